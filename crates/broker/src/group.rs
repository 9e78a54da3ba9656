//! Consumer group membership, partition assignment and read cursors.
//!
//! Every (group, topic) pair has its own lock. Membership changes and the
//! rebalance they trigger are applied under that lock, so two joins can
//! never race each other into different assignments.

use crate::config::StartFrom;
use crate::topics::Topic;
use broker_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use telemetry::metrics;
use tracing::{debug, error, info};

/// Member id within a consumer group.
pub type ConsumerId = String;

/// Partitions currently owned by one member.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assignment {
    pub generation: u64,
    pub partitions: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Partitions are spread across members by the rebalancer.
    Managed,
    /// Members name their partitions; no rebalancing.
    Explicit,
}

#[derive(Debug, Default)]
struct GroupState {
    mode: Option<Mode>,
    /// Member id -> explicitly requested partitions (empty when managed)
    members: BTreeMap<ConsumerId, Vec<i32>>,
    assignment: BTreeMap<i32, ConsumerId>,
    /// Partition -> next offset to deliver
    cursors: BTreeMap<i32, i64>,
    generation: u64,
    /// Removed from the table; joins must pick up a fresh entry
    retired: bool,
}

impl GroupState {
    fn partitions_of(&self, consumer_id: &str) -> Vec<i32> {
        self.assignment
            .iter()
            .filter(|(_, owner)| owner.as_str() == consumer_id)
            .map(|(p, _)| *p)
            .collect()
    }

    fn assignment_of(&self, consumer_id: &str) -> Assignment {
        Assignment {
            generation: self.generation,
            partitions: self.partitions_of(consumer_id),
        }
    }

    fn init_cursors(&mut self, topic: &Topic, start_from: StartFrom) {
        for partition in self.assignment.keys().copied().collect::<Vec<_>>() {
            self.cursors.entry(partition).or_insert_with(|| match start_from {
                StartFrom::Earliest => 0,
                StartFrom::Latest => topic
                    .partition(partition)
                    .map(|log| log.end_offset())
                    .unwrap_or(0),
            });
        }
    }

    fn reset(&mut self) {
        self.mode = None;
        self.members.clear();
        self.assignment.clear();
        self.cursors.clear();
    }
}

/// Spreads `partition_count` partitions over `members` in contiguous ranges.
///
/// Members are taken in sorted order; the first `count % members` members
/// get one extra partition. Same member set, same plan.
pub fn range_assign(partition_count: i32, members: &[ConsumerId]) -> BTreeMap<ConsumerId, Vec<i32>> {
    let mut plan = BTreeMap::new();
    if members.is_empty() || partition_count <= 0 {
        return plan;
    }

    let mut ids = members.to_vec();
    ids.sort();
    ids.dedup();

    let count = partition_count as usize;
    let per_member = count / ids.len();
    let with_extra = count % ids.len();

    for (index, id) in ids.into_iter().enumerate() {
        let min = index * per_member + index.min(with_extra);
        let extra = usize::from(index < with_extra);
        let max = min + per_member + extra;
        if min == max {
            continue;
        }
        plan.insert(id, (min as i32..max as i32).collect());
    }

    plan
}

/// Turns a member -> partitions plan into a partition -> member function.
///
/// Fails if any partition is claimed twice or left unowned.
fn invert_plan(
    plan: &BTreeMap<ConsumerId, Vec<i32>>,
    partition_count: i32,
    group_id: &str,
    topic: &str,
) -> Result<BTreeMap<i32, ConsumerId>> {
    let mut assignment = BTreeMap::new();
    for (member, partitions) in plan {
        for &partition in partitions {
            if assignment.insert(partition, member.clone()).is_some() {
                return Err(Error::DuplicateAssignment {
                    group: group_id.to_string(),
                    topic: topic.to_string(),
                    partition,
                });
            }
        }
    }
    if !plan.is_empty() && assignment.len() != partition_count as usize {
        return Err(Error::internal(format!(
            "rebalance of {group_id}/{topic} left {} of {partition_count} partitions unassigned",
            partition_count as usize - assignment.len()
        )));
    }
    Ok(assignment)
}

/// Consumer group table for all topics.
#[derive(Debug, Default)]
pub struct GroupTable {
    groups: Mutex<HashMap<(String, String), Arc<Mutex<GroupState>>>>,
}

impl GroupTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(group_id: &str, topic: &str) -> (String, String) {
        (group_id.to_string(), topic.to_string())
    }

    /// Runs `f` on the live state of (group, topic), creating it if needed.
    ///
    /// A state removed by a concurrent last leave is marked retired; the
    /// caller then retries against the fresh entry.
    fn with_state<R>(&self, group_id: &str, topic: &str, f: impl FnOnce(&mut GroupState) -> R) -> R {
        loop {
            let state = self
                .groups
                .lock()
                .entry(Self::key(group_id, topic))
                .or_default()
                .clone();
            let mut state = state.lock();
            if !state.retired {
                return f(&mut state);
            }
        }
    }

    fn existing(&self, group_id: &str, topic: &str) -> Option<Arc<Mutex<GroupState>>> {
        self.groups.lock().get(&Self::key(group_id, topic)).cloned()
    }

    /// Drops the (group, topic) entry once nobody is left in it.
    /// Must be called with `state` locked.
    fn retire_if_empty(&self, group_id: &str, topic: &str, state: &mut GroupState) -> bool {
        if !state.members.is_empty() {
            return false;
        }
        state.reset();
        state.retired = true;
        self.groups.lock().remove(&Self::key(group_id, topic));
        true
    }

    /// Number of (group, topic) pairs with live state.
    pub fn group_count(&self) -> usize {
        self.groups.lock().len()
    }

    /// Joins a managed group and rebalances its partitions.
    pub fn subscribe(
        &self,
        topic: &Topic,
        group_id: &str,
        consumer_id: &str,
        start_from: StartFrom,
    ) -> Result<Assignment> {
        self.with_state(group_id, topic.name(), |state| {
            let result = join_managed(state, topic, group_id, consumer_id, start_from);
            if result.is_err() {
                self.retire_if_empty(group_id, topic.name(), state);
            }
            result
        })
    }

    /// Pins `partitions` to `consumer_id` without any rebalancing.
    pub fn subscribe_explicit(
        &self,
        topic: &Topic,
        group_id: &str,
        consumer_id: &str,
        partitions: &[i32],
        start_from: StartFrom,
    ) -> Result<Assignment> {
        let requested: BTreeSet<i32> = partitions.iter().copied().collect();
        if requested.is_empty() {
            return Err(Error::invalid_subscription("explicit partition list is empty"));
        }
        for &partition in &requested {
            topic.partition_checked(partition)?;
        }

        self.with_state(group_id, topic.name(), |state| {
            let result = join_explicit(state, topic, group_id, consumer_id, &requested, start_from);
            if result.is_err() {
                self.retire_if_empty(group_id, topic.name(), state);
            }
            result
        })
    }

    /// Removes a member. Managed groups rebalance over the remaining members;
    /// the group's state is dropped when the last member leaves.
    pub fn unsubscribe(&self, topic: &Topic, group_id: &str, consumer_id: &str) -> Result<()> {
        let Some(state) = self.existing(group_id, topic.name()) else {
            return Err(Error::UnknownSubscription(format!("{group_id}/{consumer_id}")));
        };
        let mut state = state.lock();

        let Some(explicit) = state.members.remove(consumer_id) else {
            return Err(Error::UnknownSubscription(format!("{group_id}/{consumer_id}")));
        };

        if self.retire_if_empty(group_id, topic.name(), &mut state) {
            debug!(group_id = %group_id, topic = %topic.name(), "Group is empty, cursors discarded");
        } else if state.mode == Some(Mode::Managed) {
            if let Err(e) = rebalance(&mut state, topic, group_id) {
                // Keep the member out; its partitions stay parked until the next
                // successful rebalance.
                state.assignment.retain(|_, owner| owner != consumer_id);
                return Err(e);
            }
        } else {
            for partition in explicit {
                state.assignment.remove(&partition);
            }
            state.generation += 1;
        }
        topic.notify();

        info!(
            group_id = %group_id,
            topic = %topic.name(),
            consumer_id = %consumer_id,
            generation = state.generation,
            "Consumer left group"
        );
        Ok(())
    }

    /// Current assignment of a member, or `None` if it is not in the group.
    pub fn assignment(&self, group_id: &str, topic: &str, consumer_id: &str) -> Option<Assignment> {
        let state = self.existing(group_id, topic)?;
        let state = state.lock();
        state
            .members
            .contains_key(consumer_id)
            .then(|| state.assignment_of(consumer_id))
    }

    /// Next offset to deliver, if `consumer_id` owns `partition`.
    pub fn position(&self, group_id: &str, topic: &str, consumer_id: &str, partition: i32) -> Option<i64> {
        let state = self.existing(group_id, topic)?;
        let state = state.lock();
        match state.assignment.get(&partition) {
            Some(owner) if owner == consumer_id => state.cursors.get(&partition).copied(),
            _ => None,
        }
    }

    /// Advances the group cursor. Returns false if `consumer_id` no longer
    /// owns the partition, in which case nothing changes.
    pub fn commit(&self, group_id: &str, topic: &str, consumer_id: &str, partition: i32, next_offset: i64) -> bool {
        let Some(state) = self.existing(group_id, topic) else {
            return false;
        };
        let mut state = state.lock();
        match state.assignment.get(&partition) {
            Some(owner) if owner == consumer_id => {
                state.cursors.insert(partition, next_offset);
                true
            }
            _ => false,
        }
    }

    /// Full partition -> member map of a group.
    pub fn assignments(&self, group_id: &str, topic: &str) -> BTreeMap<i32, ConsumerId> {
        self.existing(group_id, topic)
            .map(|state| state.lock().assignment.clone())
            .unwrap_or_default()
    }

    pub fn members(&self, group_id: &str, topic: &str) -> Vec<ConsumerId> {
        self.existing(group_id, topic)
            .map(|state| state.lock().members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Group cursor for a partition.
    pub fn cursor(&self, group_id: &str, topic: &str, partition: i32) -> Option<i64> {
        self.existing(group_id, topic)
            .and_then(|state| state.lock().cursors.get(&partition).copied())
    }
}

fn join_managed(
    state: &mut GroupState,
    topic: &Topic,
    group_id: &str,
    consumer_id: &str,
    start_from: StartFrom,
) -> Result<Assignment> {
    if state.mode == Some(Mode::Explicit) {
        return Err(Error::invalid_subscription(format!(
            "group {group_id} already uses explicit partitions on {}",
            topic.name()
        )));
    }
    if state.members.contains_key(consumer_id) {
        return Err(Error::invalid_subscription(format!(
            "consumer {consumer_id} already joined {group_id}"
        )));
    }

    state.members.insert(consumer_id.to_string(), Vec::new());
    if let Err(e) = rebalance(state, topic, group_id) {
        state.members.remove(consumer_id);
        return Err(e);
    }
    state.mode = Some(Mode::Managed);
    state.init_cursors(topic, start_from);
    topic.notify();

    let assignment = state.assignment_of(consumer_id);
    info!(
        group_id = %group_id,
        topic = %topic.name(),
        consumer_id = %consumer_id,
        partitions = ?assignment.partitions,
        generation = assignment.generation,
        "Consumer joined group"
    );
    Ok(assignment)
}

fn join_explicit(
    state: &mut GroupState,
    topic: &Topic,
    group_id: &str,
    consumer_id: &str,
    requested: &BTreeSet<i32>,
    start_from: StartFrom,
) -> Result<Assignment> {
    if state.mode == Some(Mode::Managed) {
        return Err(Error::invalid_subscription(format!(
            "group {group_id} is rebalanced on {}; explicit partitions not allowed",
            topic.name()
        )));
    }
    if state.members.contains_key(consumer_id) {
        return Err(Error::invalid_subscription(format!(
            "consumer {consumer_id} already joined {group_id}"
        )));
    }
    if let Some(taken) = requested.iter().find(|p| state.assignment.contains_key(p)) {
        return Err(Error::invalid_subscription(format!(
            "partition {taken} of {} already owned in group {group_id}",
            topic.name()
        )));
    }

    state.mode = Some(Mode::Explicit);
    state
        .members
        .insert(consumer_id.to_string(), requested.iter().copied().collect());
    for &partition in requested {
        state.assignment.insert(partition, consumer_id.to_string());
    }
    state.generation += 1;
    state.init_cursors(topic, start_from);
    topic.notify();

    let assignment = state.assignment_of(consumer_id);
    info!(
        group_id = %group_id,
        topic = %topic.name(),
        consumer_id = %consumer_id,
        partitions = ?assignment.partitions,
        "Consumer assigned explicit partitions"
    );
    Ok(assignment)
}

/// Recomputes a managed group's assignment. On failure the previous
/// assignment is left untouched.
fn rebalance(state: &mut GroupState, topic: &Topic, group_id: &str) -> Result<()> {
    let members: Vec<ConsumerId> = state.members.keys().cloned().collect();
    let plan = range_assign(topic.partition_count(), &members);

    let assignment = invert_plan(&plan, topic.partition_count(), group_id, topic.name())
        .inspect_err(|e| {
            error!(
                group_id = %group_id,
                topic = %topic.name(),
                error = %e,
                "Rebalance produced an invalid assignment; keeping previous"
            );
        })?;

    state.assignment = assignment;
    state.generation += 1;
    metrics().rebalances.inc();

    debug!(
        group_id = %group_id,
        topic = %topic.name(),
        members = members.len(),
        generation = state.generation,
        "Rebalanced group"
    );
    Ok(())
}
