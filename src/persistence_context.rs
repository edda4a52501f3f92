//! Session-scoped identity map with dirty-checking snapshots.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{Entity, EntityKind, Managed};
use crate::model::{Member, Team};

/// A managed instance and the state last synchronized with the database.
struct Tracked<E> {
    handle: Managed<E>,
    snapshot: E,
}

/// Identity map for one entity type.
pub struct EntityEntries<E> {
    tracked: HashMap<i64, Tracked<E>>,
    removed: Vec<i64>,
}

impl<E> Default for EntityEntries<E> {
    fn default() -> Self {
        Self {
            tracked: HashMap::new(),
            removed: Vec::new(),
        }
    }
}

/// Everything one session tracks: managed entities per type, scheduled
/// removals and the `Team.members` collections that have been initialized.
#[derive(Default)]
pub struct PersistenceContext {
    pub(crate) members: EntityEntries<Member>,
    pub(crate) teams: EntityEntries<Team>,
    team_members: HashMap<i64, Vec<Managed<Member>>>,
}

impl PersistenceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Managed instance for `id`, unless it is unknown or scheduled for removal.
    pub fn get<E: Entity>(&self, id: i64) -> Option<Managed<E>> {
        let entries = E::entries(self);
        if entries.removed.contains(&id) {
            return None;
        }
        entries.tracked.get(&id).map(|t| Arc::clone(&t.handle))
    }

    /// Start tracking a freshly loaded or inserted instance.
    ///
    /// When the identifier is already managed, the existing handle wins and
    /// `entity` is discarded, so in-memory changes are never overwritten by a
    /// reload.
    pub fn register<E: Entity>(&mut self, entity: E) -> Managed<E> {
        let id = match entity.id() {
            Some(id) => id,
            None => return Arc::new(RwLock::new(entity)),
        };
        let entries = E::entries_mut(self);
        let tracked = entries.tracked.entry(id).or_insert_with(|| Tracked {
            snapshot: entity.clone(),
            handle: Arc::new(RwLock::new(entity)),
        });
        Arc::clone(&tracked.handle)
    }

    pub fn contains<E: Entity>(&self, handle: &Managed<E>) -> bool {
        let id = match handle.read().id() {
            Some(id) => id,
            None => return false,
        };
        let entries = E::entries(self);
        !entries.removed.contains(&id)
            && entries
                .tracked
                .get(&id)
                .is_some_and(|t| Arc::ptr_eq(&t.handle, handle))
    }

    pub fn schedule_removal<E: Entity>(&mut self, id: i64) {
        let entries = E::entries_mut(self);
        if !entries.removed.contains(&id) {
            entries.removed.push(id);
        }
    }

    /// Current state of every managed instance that differs from its snapshot.
    pub fn dirty<E: Entity>(&self) -> Vec<(i64, E)> {
        let entries = E::entries(self);
        let mut dirty: Vec<(i64, E)> = entries
            .tracked
            .iter()
            .filter(|(id, _)| !entries.removed.contains(id))
            .filter_map(|(id, t)| {
                let current = t.handle.read();
                (*current != t.snapshot).then(|| (*id, current.clone()))
            })
            .collect();
        dirty.sort_by_key(|(id, _)| *id);
        dirty
    }

    pub fn mark_clean<E: Entity>(&mut self, id: i64, state: E) {
        if let Some(tracked) = E::entries_mut(self).tracked.get_mut(&id) {
            tracked.snapshot = state;
        }
    }

    pub fn pending_removals<E: Entity>(&self) -> Vec<i64> {
        E::entries(self).removed.clone()
    }

    /// Stop tracking `id` entirely, including any collection it appears in.
    pub fn evict<E: Entity>(&mut self, id: i64) {
        let entries = E::entries_mut(self);
        entries.tracked.remove(&id);
        entries.removed.retain(|r| *r != id);
        match E::KIND {
            EntityKind::Member => {
                for members in self.team_members.values_mut() {
                    members.retain(|m| m.read().id != Some(id));
                }
            }
            EntityKind::Team => {
                self.team_members.remove(&id);
            }
        }
    }

    pub fn clear(&mut self) {
        self.members = EntityEntries::default();
        self.teams = EntityEntries::default();
        self.team_members.clear();
    }

    pub fn managed_count(&self) -> usize {
        self.members.tracked.len() + self.teams.tracked.len()
    }

    /// Members of `team_id`, if that collection has been initialized.
    pub fn collection(&self, team_id: i64) -> Option<Vec<Managed<Member>>> {
        self.team_members.get(&team_id).cloned()
    }

    /// Initialize a collection unless it already is; returns the live contents.
    pub fn initialize_collection(
        &mut self,
        team_id: i64,
        members: Vec<Managed<Member>>,
    ) -> Vec<Managed<Member>> {
        self.team_members
            .entry(team_id)
            .or_insert_with(|| dedup_handles(members))
            .clone()
    }

    /// Move `member` into the collection of `team_id`, keeping initialized
    /// collections consistent with the member's foreign key.
    pub fn relink_member(&mut self, member: &Managed<Member>, team_id: i64) {
        for (owner, members) in self.team_members.iter_mut() {
            if *owner != team_id {
                members.retain(|m| !Arc::ptr_eq(m, member));
            }
        }
        if let Some(members) = self.team_members.get_mut(&team_id) {
            if !members.iter().any(|m| Arc::ptr_eq(m, member)) {
                members.push(Arc::clone(member));
            }
        }
    }
}

/// Drop repeated handles, keeping first-seen order.
pub(crate) fn dedup_handles<E>(handles: Vec<Managed<E>>) -> Vec<Managed<E>> {
    let mut unique: Vec<Managed<E>> = Vec::with_capacity(handles.len());
    for handle in handles {
        if !unique.iter().any(|u| Arc::ptr_eq(u, &handle)) {
            unique.push(handle);
        }
    }
    unique
}
