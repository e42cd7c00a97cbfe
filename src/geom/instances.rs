//! Point-instance batching for forests and static props.
//!
//! No geometry here: instances are grouped by mesh type into parallel
//! position/rotation/scale arrays ready for a host instancing
//! mechanism.

use std::collections::BTreeMap;

use glam::{EulerRot, Quat, Vec3};

use crate::formats::forest::ForestItem;
use crate::records::TsStatic;

/// One instanced group: arrays are parallel, rotations are Euler radians
/// applied X then Y then Z.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstanceBatch {
    pub type_name: String,
    pub positions: Vec<Vec3>,
    pub rotations: Vec<Vec3>,
    pub scales: Vec<Vec3>,
}

impl InstanceBatch {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn push(&mut self, position: Vec3, rotation: Vec3, scale: Vec3) {
        self.positions.push(position);
        self.rotations.push(rotation);
        self.scales.push(scale);
    }
}

fn euler_from_quat(q: Quat) -> Vec3 {
    let (z, y, x) = q.to_euler(EulerRot::ZYX);
    Vec3::new(x, y, z)
}

/// Groups forest items by type name, in name order.
pub fn batch_forest_items(items: &[ForestItem]) -> Vec<InstanceBatch> {
    let mut groups: BTreeMap<&str, InstanceBatch> = BTreeMap::new();
    for item in items {
        let batch = groups
            .entry(item.type_name.as_str())
            .or_insert_with(|| InstanceBatch {
                type_name: item.type_name.clone(),
                ..InstanceBatch::default()
            });
        batch.push(
            item.position,
            euler_from_quat(item.rotation),
            Vec3::splat(item.scale),
        );
    }
    groups.into_values().collect()
}

/// Groups static shapes by shape file name (without directory).
pub fn batch_statics(statics: &[TsStatic]) -> Vec<InstanceBatch> {
    let mut groups: BTreeMap<String, InstanceBatch> = BTreeMap::new();
    for item in statics {
        let key = item.instance_name().to_string();
        let batch = groups.entry(key.clone()).or_insert_with(|| InstanceBatch {
            type_name: key,
            ..InstanceBatch::default()
        });
        batch.push(
            item.placement.position,
            item.placement.rotation,
            item.placement.scale,
        );
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Placement;

    fn item(type_name: &str, x: f32) -> ForestItem {
        ForestItem {
            type_name: type_name.to_string(),
            position: Vec3::new(x, 0.0, 0.0),
            rotation: Quat::IDENTITY,
            scale: 2.0,
        }
    }

    #[test]
    fn forest_items_group_by_type() {
        let batches = batch_forest_items(&[item("pine", 0.0), item("oak", 1.0), item("pine", 2.0)]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].type_name, "oak");
        assert_eq!(batches[1].type_name, "pine");
        assert_eq!(batches[1].len(), 2);
        assert_eq!(batches[1].scales[0], Vec3::splat(2.0));
        assert_eq!(batches[1].positions[1].x, 2.0);
    }

    #[test]
    fn quat_rotation_becomes_euler() {
        let angle = std::f32::consts::FRAC_PI_2;
        let mut tree = item("pine", 0.0);
        tree.rotation = Quat::from_rotation_z(angle);
        let batches = batch_forest_items(&[tree]);
        let euler = batches[0].rotations[0];
        assert!((euler.z - angle).abs() < 1e-5);
        assert!(euler.x.abs() < 1e-5 && euler.y.abs() < 1e-5);
    }

    #[test]
    fn statics_group_by_file_name() {
        let mk = |shape: &str| TsStatic {
            shape_name: shape.to_string(),
            placement: Placement::default(),
        };
        let batches = batch_statics(&[
            mk("art/shapes/rock.dae"),
            mk("other/dir/rock.dae"),
            mk("art/shapes/tree.dae"),
        ]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].type_name, "rock.dae");
        assert_eq!(batches[0].len(), 2);
    }
}
