use glam::Vec3;
use tandem::{Buttons, InputRecord, ObjectList, SyncEntity, WorldObject};

/// Walks the local entity around a circle so there is always something to
/// sync.
#[derive(Debug)]
pub struct Orbit {
    pub local: WorldObject,
    pub world: ObjectList,
    radius: f32,
    angular_speed: f32,
    angle: f32,
}

impl Orbit {
    pub fn new(radius: f32, angular_speed: f32) -> Self {
        Self {
            local: WorldObject::at(0, Vec3::new(radius, 1.0, 0.0)),
            world: ObjectList::new(),
            radius,
            angular_speed,
            angle: 0.0,
        }
    }

    /// Advances the local entity and returns the movement it made.
    pub fn step(&mut self, dt: f32) -> InputRecord {
        self.angle = (self.angle + self.angular_speed * dt) % std::f32::consts::TAU;

        let target = Vec3::new(
            self.radius * self.angle.cos(),
            1.0,
            self.radius * self.angle.sin(),
        );
        let movement = target - self.local.position();
        self.local.set_position(target);
        self.local
            .set_rotation(Vec3::new(0.0, (-self.angle).to_degrees(), 0.0));

        InputRecord::new(movement, Buttons::empty())
    }

    pub fn summary(&self) -> String {
        let others: Vec<String> = self
            .world
            .iter()
            .map(|o| {
                format!(
                    "#{} ({:.1}, {:.1}, {:.1})",
                    o.id, o.position.x, o.position.y, o.position.z
                )
            })
            .collect();
        format!(
            "self #{} ({:.1}, {:.1}, {:.1}), world [{}]",
            self.local.id,
            self.local.position.x,
            self.local.position.y,
            self.local.position.z,
            others.join(", ")
        )
    }
}
