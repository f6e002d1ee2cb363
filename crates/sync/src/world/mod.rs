//! The seam between the sync layer and the simulation that owns the entities.
//!
//! The session never owns entities. It reads and writes poses through
//! [`SyncEntity`] and appends remote-controlled entities through
//! [`WorldObjects`]; it never removes anything from the collection.

use glam::Vec3;

use crate::net::ObjectState;

pub trait SyncEntity {
    fn id(&self) -> u32;
    fn set_id(&mut self, id: u32);
    fn position(&self) -> Vec3;
    fn set_position(&mut self, position: Vec3);
    /// Euler angles in degrees.
    fn rotation(&self) -> Vec3;
    fn set_rotation(&mut self, rotation: Vec3);

    fn object_state(&self) -> ObjectState {
        ObjectState::new(self.id(), self.position(), self.rotation())
    }

    fn apply_pose(&mut self, state: &ObjectState) {
        self.set_position(state.position);
        self.set_rotation(state.rotation);
    }
}

/// An insertion-ordered, append-only (from our side) entity collection.
pub trait WorldObjects {
    type Object: SyncEntity;

    fn get(&self, id: u32) -> Option<&Self::Object>;
    fn get_mut(&mut self, id: u32) -> Option<&mut Self::Object>;

    /// Returns the entity with `id`, appending a new one at the origin if
    /// none exists.
    fn get_or_spawn(&mut self, id: u32) -> &mut Self::Object;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: u32) -> bool {
        self.get(id).is_some()
    }

    fn pose_of(&self, id: u32) -> Option<ObjectState> {
        self.get(id).map(SyncEntity::object_state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorldObject {
    pub id: u32,
    pub position: Vec3,
    pub rotation: Vec3,
}

impl WorldObject {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn at(id: u32, position: Vec3) -> Self {
        Self {
            id,
            position,
            rotation: Vec3::ZERO,
        }
    }
}

impl SyncEntity for WorldObject {
    fn id(&self) -> u32 {
        self.id
    }

    fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    fn rotation(&self) -> Vec3 {
        self.rotation
    }

    fn set_rotation(&mut self, rotation: Vec3) {
        self.rotation = rotation;
    }
}

/// A plain `Vec`-backed [`WorldObjects`] implementation.
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    objects: Vec<WorldObject>,
}

impl ObjectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: WorldObject) {
        self.objects.push(object);
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorldObject> {
        self.objects.iter()
    }

    pub fn ids(&self) -> Vec<u32> {
        self.objects.iter().map(|o| o.id).collect()
    }
}

impl WorldObjects for ObjectList {
    type Object = WorldObject;

    fn get(&self, id: u32) -> Option<&WorldObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    fn get_mut(&mut self, id: u32) -> Option<&mut WorldObject> {
        self.objects.iter_mut().find(|o| o.id == id)
    }

    fn get_or_spawn(&mut self, id: u32) -> &mut WorldObject {
        let index = match self.objects.iter().position(|o| o.id == id) {
            Some(index) => index,
            None => {
                self.objects.push(WorldObject::new(id));
                self.objects.len() - 1
            }
        };
        &mut self.objects[index]
    }

    fn len(&self) -> usize {
        self.objects.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_spawn_appends_once() {
        let mut list = ObjectList::new();
        list.push(WorldObject::at(5, Vec3::X));

        list.get_or_spawn(3).position = Vec3::Y;
        list.get_or_spawn(3).rotation = Vec3::Z;
        list.get_or_spawn(5);

        assert_eq!(list.ids(), vec![5, 3]);
        assert_eq!(list.pose_of(3), Some(ObjectState::new(3, Vec3::Y, Vec3::Z)));
    }

    #[test]
    fn test_apply_pose_keeps_id() {
        let mut object = WorldObject::new(4);
        object.apply_pose(&ObjectState::new(9, Vec3::ONE, Vec3::NEG_ONE));
        assert_eq!(object.id, 4);
        assert_eq!(object.position, Vec3::ONE);
        assert_eq!(object.rotation, Vec3::NEG_ONE);
    }
}
