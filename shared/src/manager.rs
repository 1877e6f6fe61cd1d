//! Peer-local object registry and delta engine
//!
//! A [`Manager`] owns every object this peer created or replicated in. It
//! computes outgoing change sets from dirty objects and applies change sets
//! from other peers, instantiating announced objects through the
//! [`TypeRegistry`]. Object ids embed the creating manager's id, so
//! populations from different senders merge without collisions.

use crate::changes::{ChangeSet, ObjectDelta};
use crate::error::ReplicationError;
use crate::object::Object;
use crate::registry::{Replicated, TypeRegistry};
use crate::value::{ManagerId, ObjectId, Value};
use log::{debug, info};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub struct Manager {
    id: ManagerId,
    registry: Arc<TypeRegistry>,
    objects: BTreeMap<ObjectId, Object>,
    next_serial: u32,
    /// Ids whose deletion has been observed; they never come back
    tombstones: HashSet<ObjectId>,
}

impl Manager {
    pub fn new(id: ManagerId, registry: Arc<TypeRegistry>) -> Self {
        Self {
            id,
            registry,
            objects: BTreeMap::new(),
            next_serial: 0,
            tombstones: HashSet::new(),
        }
    }

    pub fn id(&self) -> ManagerId {
        self.id
    }

    /// Re-labels this manager's identity space, typically right after
    /// [`Manager::reset`] once a peer id has been assigned.
    pub fn set_id(&mut self, id: ManagerId) {
        info!("Manager {} is now manager {}", self.id, id);
        self.id = id;
    }

    /// Drops every object, tombstone and the id counter
    pub fn reset(&mut self) {
        debug!("Resetting manager {} ({} objects)", self.id, self.objects.len());
        self.objects.clear();
        self.tombstones.clear();
        self.next_serial = 0;
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Creates and registers a new object of type `T` under a fresh id
    pub fn create<T: Replicated>(&mut self) -> Result<ObjectId, ReplicationError> {
        self.create_as::<T>(None)
    }

    /// Creates an object of type `T`, under `id` when one is given
    pub fn create_as<T: Replicated>(
        &mut self,
        id: Option<ObjectId>,
    ) -> Result<ObjectId, ReplicationError> {
        let object_type = *self.registry.get(T::TAG)?;

        let id = match id {
            Some(id) if self.objects.contains_key(&id) || self.tombstones.contains(&id) => {
                return Err(ReplicationError::IdInUse(id));
            }
            Some(id) => id,
            None => self.allocate_id(),
        };

        self.objects.insert(id, object_type.instantiate(id));
        debug!("Created {} object {}", T::TAG, id);
        Ok(id)
    }

    fn allocate_id(&mut self) -> ObjectId {
        loop {
            self.next_serial = self.next_serial.wrapping_add(1);
            let id = ObjectId::new(self.id, self.next_serial);
            if !self.objects.contains_key(&id) && !self.tombstones.contains(&id) {
                return id;
            }
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(&id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn objects(&self) -> impl Iterator<Item = &Object> {
        self.objects.values()
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.objects.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Looks up the object a `Ref` value points at
    pub fn resolve(&self, value: &Value) -> Option<&Object> {
        value.as_ref_id().and_then(|id| self.get(id))
    }

    /// Tombstones an object; the next delta reports the deletion
    ///
    /// Refused while another live object still references it, since every
    /// snapshot taken afterwards would carry a dangling reference.
    pub fn delete(&mut self, id: ObjectId) -> Result<(), ReplicationError> {
        if !self.objects.contains_key(&id) {
            return Err(ReplicationError::UnknownObject(id));
        }

        if let Some(referrer) = self.referrer_of(id) {
            return Err(ReplicationError::StillReferenced {
                target: id,
                referrer,
            });
        }

        if let Some(object) = self.objects.get_mut(&id) {
            object.delete();
        }
        Ok(())
    }

    fn referrer_of(&self, target: ObjectId) -> Option<ObjectId> {
        self.objects
            .iter()
            .filter(|(id, object)| **id != target && !object.is_deleted())
            .find(|(_, object)| object.references().contains(&target))
            .map(|(id, _)| *id)
    }

    /// Moves every object created under the current id into the space of
    /// `id` and re-labels the manager
    ///
    /// Serials are kept where the new id is free. References to moved
    /// objects are rewritten everywhere, queued messages included. Moved
    /// objects keep their pending changes and are announced again by the
    /// next delta. Returns how many objects moved.
    pub fn rebase(&mut self, id: ManagerId) -> usize {
        let previous = self.id;
        self.set_id(id);
        if previous == id {
            return 0;
        }

        let owned: Vec<ObjectId> = self
            .objects
            .keys()
            .filter(|object_id| object_id.owner() == previous)
            .copied()
            .collect();

        let mut moved = BTreeMap::new();
        for old_id in owned {
            let Some(mut object) = self.objects.remove(&old_id) else {
                continue;
            };

            let candidate = ObjectId::new(id, old_id.serial());
            let new_id = if self.objects.contains_key(&candidate)
                || self.tombstones.contains(&candidate)
            {
                self.allocate_id()
            } else {
                candidate
            };

            object.rekey(new_id);
            self.objects.insert(new_id, object);
            moved.insert(old_id, new_id);
        }

        if !moved.is_empty() {
            for object in self.objects.values_mut() {
                object.remap_references(&moved);
            }
            debug!("Moved {} objects from manager {} to {}", moved.len(), previous, id);
        }
        moved.len()
    }

    /// Collects outgoing changes
    ///
    /// By default returns every object with dirty attributes, queued
    /// messages, a pending creation record or a pending deletion, and
    /// clears that state. With `everything` set, returns a snapshot of all
    /// live objects instead and leaves dirty state alone. Returns `None`
    /// when there is nothing to send.
    pub fn get_changes(&mut self, everything: bool) -> Option<ChangeSet> {
        let changes = if everything {
            self.snapshot()
        } else {
            self.collect_delta()
        };

        if changes.is_empty() {
            None
        } else {
            Some(changes)
        }
    }

    fn snapshot(&self) -> ChangeSet {
        let objects = self
            .objects
            .iter()
            .filter(|(_, object)| !object.is_deleted())
            .map(|(id, object)| (*id, object.snapshot()))
            .collect();

        ChangeSet {
            snapshot: true,
            objects,
        }
    }

    fn collect_delta(&mut self) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for (id, object) in self.objects.iter_mut() {
            if object.is_deleted() {
                changes.objects.insert(*id, ObjectDelta::deletion());
                continue;
            }

            if !object.is_announced() {
                let mut creation = object.snapshot();
                if let Some(pending) = object.get_changes() {
                    creation.messages = pending.messages;
                }
                object.set_announced();
                changes.objects.insert(*id, creation);
            } else if let Some(delta) = object.get_changes() {
                changes.objects.insert(*id, delta);
            }
        }

        let deleted: Vec<ObjectId> = self
            .objects
            .iter()
            .filter(|(_, object)| object.is_deleted())
            .map(|(id, _)| *id)
            .collect();

        for id in deleted {
            self.objects.remove(&id);
            self.tombstones.insert(id);
            debug!("Object {} dropped from manager {}", id, self.id);
        }

        changes
    }

    /// Applies a change set received from `sender`
    ///
    /// The whole set is validated before anything is modified: an unknown
    /// object without a type tag, an unregistered tag, an undeclared
    /// attribute, a value of the wrong kind or a reference to an object that
    /// does not exist here is returned as an error and nothing is applied.
    /// So is the deletion of an object that a live object here would still
    /// reference afterwards.
    /// Populations from different senders accumulate; a later change set
    /// never removes objects it does not mention.
    pub fn apply_changes(
        &mut self,
        sender: ManagerId,
        changes: &ChangeSet,
    ) -> Result<(), ReplicationError> {
        let mut fresh: BTreeMap<ObjectId, Object> = BTreeMap::new();
        let mut accepted: Vec<(ObjectId, &ObjectDelta)> = Vec::new();

        for (id, delta) in &changes.objects {
            if delta.deleted {
                continue;
            }

            if self.tombstones.contains(id) {
                debug!("Ignoring change from {} for deleted object {}", sender, id);
                continue;
            }

            match self.objects.get(id) {
                Some(object) if object.is_deleted() => {
                    debug!("Ignoring change from {} for deleted object {}", sender, id);
                    continue;
                }
                Some(object) => object.validate(delta)?,
                None => {
                    let tag = delta
                        .tag
                        .as_deref()
                        .ok_or(ReplicationError::UnknownObject(*id))?;
                    let object = self.registry.get(tag)?.instantiate(*id);
                    object.validate(delta)?;
                    fresh.insert(*id, object);
                }
            }
            accepted.push((*id, delta));
        }

        for (id, delta) in &accepted {
            for value in delta.attributes.values() {
                for target in value.references() {
                    let deleted_here = changes.objects.get(&target).map_or(false, |d| d.deleted);
                    let known = fresh.contains_key(&target)
                        || self.objects.get(&target).map_or(false, |o| !o.is_deleted());
                    if deleted_here || !known {
                        return Err(ReplicationError::DanglingReference {
                            object: *id,
                            target,
                        });
                    }
                }
            }
        }

        let removed: Vec<ObjectId> = changes
            .objects
            .iter()
            .filter(|(_, d)| d.deleted)
            .map(|(id, _)| *id)
            .collect();

        if !removed.is_empty() {
            let pending: BTreeMap<ObjectId, &ObjectDelta> =
                accepted.iter().map(|(id, delta)| (*id, *delta)).collect();

            for (id, object) in &self.objects {
                if object.is_deleted() || removed.contains(id) {
                    continue;
                }
                let held = object.references_after(pending.get(id).copied());
                if let Some(target) = removed.iter().find(|target| held.contains(*target)) {
                    return Err(ReplicationError::StillReferenced {
                        target: *target,
                        referrer: *id,
                    });
                }
            }
        }

        for (id, mut object) in fresh {
            object.mark_clean();
            object.set_announced();
            debug!("Replicated {} object {} from {}", object.tag(), id, sender);
            self.objects.insert(id, object);
        }

        for id in removed {
            if self.objects.remove(&id).is_some() {
                debug!("Object {} deleted by {}", id, sender);
            }
            self.tombstones.insert(id);
        }

        for (id, delta) in accepted {
            if let Some(object) = self.objects.get_mut(&id) {
                object.apply_changes(delta)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changes::Message;
    use crate::value::Field;

    struct Dummy;

    impl Replicated for Dummy {
        const TAG: &'static str = "Dummy";
        const SCHEMA: &'static [Field] = &[
            Field::new("x", crate::value::ValueKind::Any),
            Field::scalar("y"),
            Field::scalar("z"),
            Field::scalar("name"),
        ];

        fn setup(object: &mut Object) {
            let _ = object.set("x", 1);
            let _ = object.set("y", 2);
            let _ = object.set("z", 3);
            let _ = object.set("name", "unnamed");
            object.connect("Ping", |object, message| {
                let _ = object.set("last_message", message.kind.as_str());
            });
        }
    }

    struct Holder;

    impl Replicated for Holder {
        const TAG: &'static str = "Holder";
        const SCHEMA: &'static [Field] = &[
            Field::reference("single"),
            Field::reference_list("items"),
        ];
    }

    fn registry() -> Arc<TypeRegistry> {
        Arc::new(
            TypeRegistry::new()
                .with::<Dummy>()
                .unwrap()
                .with::<Holder>()
                .unwrap(),
        )
    }

    fn named(manager: &mut Manager, name: &str) -> ObjectId {
        let id = manager.create::<Dummy>().unwrap();
        manager.get_mut(id).unwrap().set("name", name).unwrap();
        id
    }

    #[test]
    fn test_ids_embed_manager_id() {
        let mut manager = Manager::new(100, registry());
        let first = manager.create::<Dummy>().unwrap();
        let second = manager.create::<Dummy>().unwrap();

        assert_eq!(first.owner(), 100);
        assert_eq!(second.owner(), 100);
        assert_ne!(first, second);
    }

    #[test]
    fn test_unregistered_type_cannot_be_created() {
        let mut manager = Manager::new(1, Arc::new(TypeRegistry::new()));
        assert!(matches!(
            manager.create::<Dummy>(),
            Err(ReplicationError::UnknownType(_))
        ));
    }

    #[test]
    fn test_create_with_explicit_id() {
        let mut manager = Manager::new(1, registry());
        let id = ObjectId::new(9, 9);
        assert_eq!(manager.create_as::<Dummy>(Some(id)).unwrap(), id);
        assert!(matches!(
            manager.create_as::<Dummy>(Some(id)),
            Err(ReplicationError::IdInUse(_))
        ));
    }

    #[test]
    fn test_delta_is_consumed() {
        let mut manager = Manager::new(100, registry());
        let id = manager.create::<Dummy>().unwrap();

        let creation = manager.get_changes(false).unwrap();
        assert_eq!(creation.objects[&id].tag.as_deref(), Some("Dummy"));
        assert!(manager.get_changes(false).is_none());

        manager.get_mut(id).unwrap().set("x", 1234).unwrap();
        let update = manager.get_changes(false).unwrap();
        assert!(update.objects[&id].tag.is_none());
        assert_eq!(update.objects[&id].attributes["x"], Value::Int(1234));
        assert!(manager.get_changes(false).is_none());
    }

    #[test]
    fn test_state_migration() {
        let mut manager = Manager::new(200, registry());
        let obj = named(&mut manager, "first");
        manager.get_mut(obj).unwrap().set("x", 31337).unwrap();

        let original_id = manager.id();
        let data = manager.get_changes(true).unwrap();
        assert!(data.snapshot);

        manager.reset();
        manager.set_id(1);
        manager.apply_changes(original_id, &data).unwrap();
        assert_eq!(manager.get(obj).unwrap().get("x"), Some(&Value::Int(31337)));

        let third = named(&mut manager, "third");
        manager.get_mut(third).unwrap().set("x", 0xDADA).unwrap();
        let fourth = named(&mut manager, "fourth");
        manager.delete(fourth).unwrap();

        manager.get_changes(false);
        let data = manager.get_changes(true).unwrap();

        manager.reset();
        manager.set_id(2);
        manager.apply_changes(original_id, &data).unwrap();

        assert!(manager.contains(obj));
        assert!(manager.contains(third));
        assert!(!manager.contains(fourth));
        assert_eq!(manager.get(third).unwrap().get("x"), Some(&Value::Int(0xDADA)));
    }

    #[test]
    fn test_snapshot_excludes_unobserved_deletions() {
        let mut manager = Manager::new(5, registry());
        let kept = manager.create::<Dummy>().unwrap();
        let gone = manager.create::<Dummy>().unwrap();
        manager.delete(gone).unwrap();

        let snapshot = manager.get_changes(true).unwrap();
        assert!(snapshot.objects.contains_key(&kept));
        assert!(!snapshot.objects.contains_key(&gone));
    }

    #[test]
    fn test_deletion_reported_once() {
        let mut manager = Manager::new(5, registry());
        let id = manager.create::<Dummy>().unwrap();
        manager.get_changes(false);

        manager.delete(id).unwrap();
        let changes = manager.get_changes(false).unwrap();
        assert!(changes.objects[&id].deleted);
        assert!(!manager.contains(id));

        assert!(manager.get_changes(false).is_none());
        assert!(manager.get_changes(true).is_none());
    }

    #[test]
    fn test_deleted_ids_are_never_reused() {
        let mut manager = Manager::new(5, registry());
        let id = manager.create::<Dummy>().unwrap();
        manager.delete(id).unwrap();
        manager.get_changes(false);

        let next = manager.create::<Dummy>().unwrap();
        assert_ne!(next, id);
        assert!(matches!(
            manager.create_as::<Dummy>(Some(id)),
            Err(ReplicationError::IdInUse(_))
        ));
    }

    #[test]
    fn test_references() {
        let mut manager = Manager::new(300, registry());
        let bag = named(&mut manager, "bag");
        let apple = named(&mut manager, "apple");
        manager.get_mut(bag).unwrap().set("x", vec![apple]).unwrap();

        let data = manager.get_changes(false).unwrap();
        manager.reset();
        manager.set_id(1);
        manager.apply_changes(300, &data).unwrap();

        let bag_clone = manager.get(bag).unwrap();
        let apple_clone = manager.get(apple).unwrap();
        assert_eq!(bag_clone.get("name"), Some(&Value::Text("bag".into())));
        assert_eq!(apple_clone.get("name"), Some(&Value::Text("apple".into())));

        let contents = bag_clone.get("x").and_then(Value::as_list).unwrap();
        let held = manager.resolve(&contents[0]).unwrap();
        assert!(std::ptr::eq(held, apple_clone));
    }

    #[test]
    fn test_multiple_managers() {
        let mut one = Manager::new(1000, registry());
        let mut two = Manager::new(2000, registry());
        one.create::<Dummy>().unwrap();
        two.create::<Dummy>().unwrap();

        let from_two = two.get_changes(false).unwrap();
        one.apply_changes(two.id(), &from_two).unwrap();
        let from_one = one.get_changes(false).unwrap();
        two.apply_changes(one.id(), &from_one).unwrap();

        assert_eq!(one.len(), 2);
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn test_messages_cross_managers() {
        let mut one = Manager::new(1, registry());
        let mut two = Manager::new(2, registry());
        let id = one.create::<Dummy>().unwrap();
        two.apply_changes(1, &one.get_changes(false).unwrap()).unwrap();

        one.get_mut(id).unwrap().emit(Message::new("Ping")).unwrap();
        two.apply_changes(1, &one.get_changes(false).unwrap()).unwrap();

        let replica = two.get(id).unwrap();
        assert_eq!(replica.get("last_message"), Some(&Value::Text("Ping".into())));
        assert!(two.get_changes(false).is_none());
    }

    #[test]
    fn test_unknown_object_without_tag() {
        let mut manager = Manager::new(1, registry());
        let mut changes = ChangeSet::default();
        let mut delta = ObjectDelta::default();
        delta.attributes.insert("x".into(), Value::Int(1));
        changes.objects.insert(ObjectId::new(7, 1), delta);

        assert!(matches!(
            manager.apply_changes(7, &changes),
            Err(ReplicationError::UnknownObject(_))
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_unknown_tag_is_surfaced() {
        let mut manager = Manager::new(1, registry());
        let mut changes = ChangeSet::default();
        changes.objects.insert(
            ObjectId::new(7, 1),
            ObjectDelta {
                tag: Some("Song".into()),
                ..ObjectDelta::default()
            },
        );

        assert!(matches!(
            manager.apply_changes(7, &changes),
            Err(ReplicationError::UnknownType(_))
        ));
    }

    #[test]
    fn test_dangling_reference_applies_nothing() {
        let mut source = Manager::new(7, registry());
        let bag = source.create::<Dummy>().unwrap();
        let apple = source.create::<Dummy>().unwrap();
        source.get_mut(bag).unwrap().set("x", vec![apple]).unwrap();
        let mut changes = source.get_changes(false).unwrap();
        changes.objects.remove(&apple);

        let mut manager = Manager::new(1, registry());
        assert!(matches!(
            manager.apply_changes(7, &changes),
            Err(ReplicationError::DanglingReference { .. })
        ));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_fault_leaves_other_objects_untouched() {
        let mut source = Manager::new(7, registry());
        let good = source.create::<Dummy>().unwrap();
        let mut manager = Manager::new(1, registry());
        manager.apply_changes(7, &source.get_changes(false).unwrap()).unwrap();

        source.get_mut(good).unwrap().set("y", 99).unwrap();
        let mut changes = source.get_changes(false).unwrap();
        changes
            .objects
            .get_mut(&good)
            .unwrap()
            .attributes
            .insert("secret".into(), Value::Int(1));

        assert!(manager.apply_changes(7, &changes).is_err());
        assert_eq!(manager.get(good).unwrap().get("y"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_remote_deletion_is_permanent() {
        let mut source = Manager::new(7, registry());
        let id = source.create::<Dummy>().unwrap();
        let creation = source.get_changes(false).unwrap();

        let mut manager = Manager::new(1, registry());
        manager.apply_changes(7, &creation).unwrap();
        source.delete(id).unwrap();
        manager.apply_changes(7, &source.get_changes(false).unwrap()).unwrap();
        assert!(!manager.contains(id));

        manager.apply_changes(7, &creation).unwrap();
        assert!(!manager.contains(id));
    }

    #[test]
    fn test_later_sender_does_not_remove_others() {
        let mut one = Manager::new(1, registry());
        let mut two = Manager::new(2, registry());
        let mut hub = Manager::new(0, registry());
        let a = one.create::<Dummy>().unwrap();
        let b = two.create::<Dummy>().unwrap();

        hub.apply_changes(1, &one.get_changes(false).unwrap()).unwrap();
        hub.apply_changes(2, &two.get_changes(false).unwrap()).unwrap();
        one.get_mut(a).unwrap().set("y", 10).unwrap();
        hub.apply_changes(1, &one.get_changes(false).unwrap()).unwrap();

        assert!(hub.contains(a));
        assert!(hub.contains(b));
        assert_eq!(hub.get(a).unwrap().get("y"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_last_write_wins_by_receipt_order() {
        let mut one = Manager::new(1, registry());
        let mut two = Manager::new(2, registry());
        let id = one.create::<Dummy>().unwrap();
        two.apply_changes(1, &one.get_changes(false).unwrap()).unwrap();

        one.get_mut(id).unwrap().set("y", 10).unwrap();
        two.get_mut(id).unwrap().set("y", 20).unwrap();

        let mut hub = Manager::new(0, registry());
        hub.apply_changes(1, &one.get_changes(true).unwrap()).unwrap();
        hub.apply_changes(2, &two.get_changes(false).unwrap()).unwrap();
        assert_eq!(hub.get(id).unwrap().get("y"), Some(&Value::Int(20)));
    }

    #[test]
    fn test_references_survive_snapshot() {
        let mut source = Manager::new(300, registry());
        let holder = source.create::<Holder>().unwrap();
        let apple = named(&mut source, "apple");
        let pear = named(&mut source, "pear");
        {
            let object = source.get_mut(holder).unwrap();
            object.set("single", apple).unwrap();
            object.set("items", vec![apple, pear]).unwrap();
        }

        let snapshot = source.get_changes(true).unwrap();
        assert!(snapshot.snapshot);
        let mut replica = Manager::new(1, registry());
        replica.apply_changes(300, &snapshot).unwrap();

        let copy = replica.get(holder).unwrap();
        let single = replica.resolve(copy.get("single").unwrap()).unwrap();
        assert!(std::ptr::eq(single, replica.get(apple).unwrap()));

        let items = copy.get("items").and_then(Value::as_list).unwrap();
        assert_eq!(items.len(), 2);
        assert!(std::ptr::eq(
            replica.resolve(&items[0]).unwrap(),
            replica.get(apple).unwrap()
        ));
        assert!(std::ptr::eq(
            replica.resolve(&items[1]).unwrap(),
            replica.get(pear).unwrap()
        ));
    }

    #[test]
    fn test_referenced_object_cannot_be_deleted() {
        let mut manager = Manager::new(7, registry());
        let player = manager.create::<Holder>().unwrap();
        let guitar = named(&mut manager, "guitar");
        manager.get_mut(player).unwrap().set("single", guitar).unwrap();
        manager.get_changes(false);

        let err = manager.delete(guitar).unwrap_err();
        assert!(matches!(
            err,
            ReplicationError::StillReferenced { target, referrer }
                if target == guitar && referrer == player
        ));
        assert!(!manager.get(guitar).unwrap().is_deleted());

        manager.get_mut(player).unwrap().set("single", Value::Nil).unwrap();
        manager.delete(guitar).unwrap();
        manager.get_changes(false);

        let mut fresh = Manager::new(1, registry());
        fresh
            .apply_changes(7, &manager.get_changes(true).unwrap())
            .unwrap();
        assert!(fresh.contains(player));
        assert!(!fresh.contains(guitar));
    }

    #[test]
    fn test_deleted_referrer_releases_target() {
        let mut manager = Manager::new(7, registry());
        let player = manager.create::<Holder>().unwrap();
        let guitar = named(&mut manager, "guitar");
        manager.get_mut(player).unwrap().set("single", guitar).unwrap();

        manager.delete(player).unwrap();
        manager.delete(guitar).unwrap();
        let changes = manager.get_changes(false).unwrap();
        assert!(changes.objects.values().all(|delta| delta.deleted));
    }

    #[test]
    fn test_remote_deletion_of_referenced_object_is_rejected() {
        let mut source = Manager::new(7, registry());
        let guitar = named(&mut source, "guitar");
        let mut replica = Manager::new(1, registry());
        replica
            .apply_changes(7, &source.get_changes(false).unwrap())
            .unwrap();

        let player = replica.create::<Holder>().unwrap();
        replica.get_mut(player).unwrap().set("single", guitar).unwrap();

        source.delete(guitar).unwrap();
        let deletion = source.get_changes(false).unwrap();
        assert!(matches!(
            replica.apply_changes(7, &deletion),
            Err(ReplicationError::StillReferenced { .. })
        ));
        assert!(replica.contains(guitar));
    }

    #[test]
    fn test_rebase_moves_owned_objects() {
        let mut manager = Manager::new(u32::MAX, registry());
        let holder = manager.create::<Holder>().unwrap();
        let apple = named(&mut manager, "apple");
        manager.get_mut(holder).unwrap().set("single", apple).unwrap();
        manager
            .get_mut(holder)
            .unwrap()
            .emit(Message::new("Pick").with_arg(apple))
            .unwrap();

        let mut other = Manager::new(9, registry());
        let foreign = other.create::<Dummy>().unwrap();
        manager
            .apply_changes(9, &other.get_changes(false).unwrap())
            .unwrap();

        assert_eq!(manager.rebase(5), 2);
        assert_eq!(manager.id(), 5);

        let new_holder = ObjectId::new(5, holder.serial());
        let new_apple = ObjectId::new(5, apple.serial());
        assert!(!manager.contains(holder));
        assert!(manager.contains(new_holder));
        assert!(manager.contains(foreign));
        assert_eq!(manager.get(new_holder).unwrap().id(), new_holder);
        assert_eq!(
            manager.get(new_holder).unwrap().get("single"),
            Some(&Value::Ref(new_apple))
        );

        let changes = manager.get_changes(false).unwrap();
        let creation = &changes.objects[&new_holder];
        assert_eq!(creation.tag.as_deref(), Some("Holder"));
        assert_eq!(creation.messages.len(), 1);
        assert_eq!(creation.messages[0].args, vec![Value::Ref(new_apple)]);
        assert!(!changes.objects.contains_key(&foreign));

        let fresh_id = manager.create::<Dummy>().unwrap();
        assert_eq!(fresh_id.owner(), 5);
        assert_ne!(fresh_id, new_holder);
        assert_ne!(fresh_id, new_apple);
    }
}
