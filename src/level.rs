//! Level discovery and assembly.
//!
//! A level is a directory `levels/<name>/` somewhere in the file index.
//! Records come from relaxed-JSON item files under `main/`, with a
//! TorqueScript fallback for legacy exports.  Assembly is ordered:
//! terrain first so roads and decals have a surface to drape onto, then
//! solid geometry, then everything that raycasts against it.
//!
//! Per-file failures are logged and skipped; a half-broken mod should
//! still import the parts that decode.

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};

use crate::formats::decal::{decode_decals_json, decode_tddf, DecalInstanceMap};
use crate::formats::forest::{decode_fkdf, decode_forest4, decode_forest_json, ForestItem};
use crate::formats::terrain::{decode_ter, TerrainData};
use crate::geom::bvh::SceneRaycaster;
use crate::geom::decal::{build_decal_patch, DecalDef};
use crate::geom::instances::{batch_forest_items, batch_statics, InstanceBatch};
use crate::geom::mesh_road::build_mesh_road;
use crate::geom::river::build_river;
use crate::geom::road::{build_decal_road, RibbonOptions};
use crate::geom::terrain::{build_terrain_mesh, TerrainMeshOptions};
use crate::mesh::MeshBuffer;
use crate::progress::Progress;
use crate::records::{
    record_class, DecalRoad, MeshRoad, River, TerrainBlock, TsStatic,
};
use crate::sjson::{self, Value};
use crate::vfs::{decode_text, FileIndex};

/// A discovered level: directory name plus its display title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelInfo {
    pub name: String,
    pub title: String,
}

/// Every `levels/<name>/info.json` in the index, in name order.
pub fn list_levels(index: &FileIndex) -> Vec<LevelInfo> {
    let mut out = Vec::new();
    for key in index.keys_where(|k| k.starts_with("levels/") && k.ends_with("/info.json")) {
        let Some(middle) = key
            .strip_prefix("levels/")
            .and_then(|rest| rest.strip_suffix("/info.json"))
        else {
            continue;
        };
        if middle.is_empty() || middle.contains('/') {
            continue;
        }
        let title = index
            .read_virtual(key, None)
            .ok()
            .and_then(|data| sjson::decode(&decode_text(&data)).ok())
            .and_then(|doc| {
                ["title", "name"]
                    .iter()
                    .find_map(|f| doc.get(f).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or_else(|| middle.to_string());
        out.push(LevelInfo {
            name: middle.to_string(),
            title,
        });
    }
    out
}

fn level_dir(name: &str) -> String {
    format!("levels/{}", name.to_lowercase())
}

/// Loads every object record for a level.
///
/// JSON item files under `main/` win; when none decode, `.mis`/`.cs`
/// scripts are parsed instead, first under `main/`, then directly at the
/// level root.
pub fn load_main_records(index: &FileIndex, dir: &str) -> Vec<Value> {
    let main_prefix = format!("{dir}/main/");
    let mut out = Vec::new();
    for key in index.keys_where(|k| k.starts_with(&main_prefix) && k.ends_with(".json")) {
        match index.read_virtual(key, None) {
            Ok(data) => out.extend(sjson::decode_records(&decode_text(&data))),
            Err(err) => log::warn!("skipping {key}: {err:#}"),
        }
    }
    if !out.is_empty() {
        return out;
    }

    let is_script = |name: &str| name.ends_with(".mis") || name.ends_with(".cs");
    let mut script_keys: Vec<String> = index
        .keys_where(|k| k.starts_with(&main_prefix) && is_script(k))
        .into_iter()
        .map(str::to_string)
        .collect();
    if script_keys.is_empty() {
        let root = format!("{dir}/");
        script_keys = index
            .keys_where(|k| {
                k.strip_prefix(root.as_str())
                    .is_some_and(|rest| !rest.contains('/') && is_script(rest))
            })
            .into_iter()
            .map(str::to_string)
            .collect();
    }
    for key in &script_keys {
        match index.read_virtual(key, None) {
            Ok(data) => {
                let objects = crate::tscript::parse_objects(&decode_text(&data));
                out.extend(objects.into_iter().filter(|o| record_class(o).is_some()));
            }
            Err(err) => log::warn!("skipping {key}: {err:#}"),
        }
    }
    out
}

/// Loads forest placements, preferring the `forest/` subtree and the
/// newest format: v4 line records, then v2/v3 JSON, then the packed
/// binary.
pub fn load_forest_items(index: &FileIndex, dir: &str) -> Vec<ForestItem> {
    let gather = |prefix: &str| -> (Vec<String>, Vec<String>, Vec<String>) {
        let collect = |suffix: &str| {
            index
                .keys_where(|k| k.starts_with(prefix) && k.ends_with(suffix))
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        (
            collect(".forest4.json"),
            collect(".forest.json"),
            collect(".forest"),
        )
    };

    let (mut f4, mut v23, mut packed) = gather(&format!("{dir}/forest/"));
    if f4.is_empty() && v23.is_empty() && packed.is_empty() {
        (f4, v23, packed) = gather(&format!("{dir}/"));
    }

    let mut out = Vec::new();
    if !f4.is_empty() {
        for key in &f4 {
            match index.read_virtual(key, None) {
                Ok(data) => out.extend(decode_forest4(&decode_text(&data))),
                Err(err) => log::warn!("skipping {key}: {err:#}"),
            }
        }
        return out;
    }
    for key in &v23 {
        match index
            .read_virtual(key, None)
            .and_then(|data| Ok(sjson::decode(&decode_text(&data))?))
        {
            Ok(doc) => out.extend(decode_forest_json(&doc)),
            Err(err) => log::warn!("skipping {key}: {err:#}"),
        }
    }
    if !out.is_empty() {
        return out;
    }
    for key in &packed {
        match index
            .read_virtual(key, None)
            .and_then(|data| decode_fkdf(&data))
        {
            Ok(items) => out.extend(items),
            Err(err) => log::warn!("skipping {key}: {err:#}"),
        }
    }
    out
}

/// Loads decal definitions and placed instances.
///
/// Definitions come from managed decal data under `art/decals/`;
/// instances from `*.decals.json` documents at the level root, with the
/// packed `.decals` container as fallback.
pub fn load_decal_sets(
    index: &FileIndex,
    dir: &str,
) -> (BTreeMap<String, DecalDef>, DecalInstanceMap) {
    let mut defs = BTreeMap::new();
    let managed_prefix = format!("{dir}/art/decals/");
    for key in
        index.keys_where(|k| k.starts_with(&managed_prefix) && k.ends_with("manageddecaldata.json"))
    {
        let doc = match index
            .read_virtual(key, None)
            .and_then(|data| Ok(sjson::decode(&decode_text(&data))?))
        {
            Ok(doc) => doc,
            Err(err) => {
                log::warn!("skipping {key}: {err:#}");
                continue;
            }
        };
        let Some(fields) = doc.as_object() else {
            continue;
        };
        for (name, rec) in fields {
            if record_class(rec) == Some("DecalData") {
                defs.insert(name.clone(), DecalDef::from_record(name, rec));
            }
        }
    }

    let root = format!("{dir}/");
    let root_keys = |suffix: &str| -> Vec<String> {
        index
            .keys_where(|k| {
                k.strip_prefix(root.as_str())
                    .is_some_and(|rest| !rest.contains('/') && rest.ends_with(suffix))
            })
            .into_iter()
            .map(str::to_string)
            .collect()
    };

    let mut instances = DecalInstanceMap::new();
    let merge = |instances: &mut DecalInstanceMap, more: DecalInstanceMap| {
        for (name, list) in more {
            instances.entry(name).or_default().extend(list);
        }
    };

    let json_keys = root_keys(".decals.json");
    if !json_keys.is_empty() {
        for key in &json_keys {
            match index
                .read_virtual(key, None)
                .and_then(|data| Ok(sjson::decode(&decode_text(&data))?))
            {
                Ok(doc) => merge(&mut instances, decode_decals_json(&doc)),
                Err(err) => log::warn!("skipping {key}: {err:#}"),
            }
        }
        return (defs, instances);
    }
    for key in &root_keys(".decals") {
        match index
            .read_virtual(key, None)
            .and_then(|data| decode_tddf(&data))
        {
            Ok(more) => merge(&mut instances, more),
            Err(err) => log::warn!("skipping {key}: {err:#}"),
        }
    }
    (defs, instances)
}

/// Resolves and decodes a terrain block's heightfield, following links.
pub fn load_terrain(index: &FileIndex, block: &TerrainBlock, dir: &str) -> Result<TerrainData> {
    let file = block
        .terrain_file
        .as_deref()
        .ok_or_else(|| anyhow!("terrain block {} names no terrain file", block.name))?;
    let data = index
        .read_virtual(file, Some(dir))
        .with_context(|| format!("terrain {file}"))?;
    decode_ter(&data).with_context(|| format!("terrain {file}"))
}

/// A generated mesh with the record name it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMesh {
    pub name: String,
    pub mesh: MeshBuffer,
}

/// Everything generated for one level.
#[derive(Debug, Default)]
pub struct LevelScene {
    pub name: String,
    pub terrain: Vec<NamedMesh>,
    pub mesh_roads: Vec<NamedMesh>,
    pub decal_roads: Vec<NamedMesh>,
    pub rivers: Vec<NamedMesh>,
    pub decals: Vec<NamedMesh>,
    pub forest: Vec<InstanceBatch>,
    pub statics: Vec<InstanceBatch>,
    /// Record counts per class, including classes nothing here handles.
    pub class_counts: BTreeMap<String, usize>,
}

impl LevelScene {
    pub fn meshes(&self) -> impl Iterator<Item = &NamedMesh> {
        self.terrain
            .iter()
            .chain(&self.mesh_roads)
            .chain(&self.decal_roads)
            .chain(&self.rivers)
            .chain(&self.decals)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes().count()
    }

    pub fn triangle_count(&self) -> usize {
        self.meshes().map(|m| m.mesh.triangle_count()).sum()
    }

    pub fn instance_count(&self) -> usize {
        self.forest
            .iter()
            .chain(&self.statics)
            .map(InstanceBatch::len)
            .sum()
    }
}

/// Loads a level's records and generates all of its geometry.
pub fn build_level(index: &FileIndex, name: &str, progress: &mut Progress) -> Result<LevelScene> {
    let dir = level_dir(name);
    let prefix = format!("{dir}/");
    if index.keys_where(|k| k.starts_with(&prefix)).is_empty() {
        return Err(anyhow!("level {name} not found in the file index"));
    }

    let records = load_main_records(index, &dir);
    progress.begin(records.len() + 3, &format!("importing level {name}"));

    let mut scene = LevelScene {
        name: name.to_string(),
        ..LevelScene::default()
    };
    let mut terrain_blocks = Vec::new();
    let mut mesh_roads = Vec::new();
    let mut decal_roads = Vec::new();
    let mut rivers = Vec::new();
    let mut statics = Vec::new();

    for rec in &records {
        let class = record_class(rec).unwrap_or("(unclassed)").to_string();
        *scene.class_counts.entry(class.clone()).or_insert(0) += 1;
        match class.as_str() {
            "TerrainBlock" => terrain_blocks.push(TerrainBlock::from_record(rec)),
            "MeshRoad" => mesh_roads.extend(MeshRoad::from_record(rec)),
            "DecalRoad" => decal_roads.extend(DecalRoad::from_record(rec)),
            "River" => rivers.extend(River::from_record(rec)),
            "TSStatic" => statics.extend(TsStatic::from_record(rec)),
            _ => {}
        }
        progress.step(1);
    }

    // Terrain first: it is the raycast target for everything draped.
    let mut raycaster = SceneRaycaster::new();
    for block in &terrain_blocks {
        match load_terrain(index, block, &dir) {
            Ok(ter) => {
                let mut mesh = build_terrain_mesh(&ter, block, &TerrainMeshOptions::default());
                for p in &mut mesh.positions {
                    *p += block.position;
                }
                raycaster.add_terrain(&mesh);
                scene.terrain.push(NamedMesh {
                    name: block.name.clone(),
                    mesh,
                });
            }
            Err(err) => log::warn!("terrain block {}: {err:#}", block.name),
        }
    }

    // Solid roads join the raycast set so overObjects decals can land on
    // them.
    for road in &mesh_roads {
        if let Some(mesh) = build_mesh_road(road) {
            raycaster.add_mesh(&mesh);
            scene.mesh_roads.push(NamedMesh {
                name: road.name.clone(),
                mesh,
            });
        }
    }

    let ribbon = RibbonOptions::default();
    for road in &decal_roads {
        if let Some(mesh) = build_decal_road(road, &raycaster, &ribbon) {
            scene.decal_roads.push(NamedMesh {
                name: road.name.clone(),
                mesh,
            });
        }
    }
    for river in &rivers {
        if let Some(mesh) = build_river(river, &raycaster) {
            scene.rivers.push(NamedMesh {
                name: river.name.clone(),
                mesh,
            });
        }
    }
    progress.update("draped roads and rivers");

    let (defs, instance_sets) = load_decal_sets(index, &dir);
    for (def_name, instances) in &instance_sets {
        let def = defs.get(def_name).cloned().unwrap_or_else(|| DecalDef {
            name: def_name.clone(),
            ..DecalDef::default()
        });
        let mut merged = MeshBuffer::default();
        for instance in instances {
            merged.append(&build_decal_patch(&def, instance, &raycaster));
        }
        if !merged.is_empty() {
            scene.decals.push(NamedMesh {
                name: def_name.clone(),
                mesh: merged,
            });
        }
    }
    progress.update("projected decals");

    scene.forest = batch_forest_items(&load_forest_items(index, &dir));
    scene.statics = batch_statics(&statics);
    progress.end(&format!(
        "level {name}: {} meshes, {} instances",
        scene.mesh_count(),
        scene.instance_count()
    ));
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    use crate::vfs::{scan, ScanOptions};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, data: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }

    fn flat_terrain_file(size: u32) -> Vec<u8> {
        let mut data = vec![8u8];
        data.extend_from_slice(&size.to_le_bytes());
        for _ in 0..size * size {
            data.extend_from_slice(&64u16.to_le_bytes());
        }
        data.extend(std::iter::repeat(0u8).take((size * size) as usize));
        data.extend(std::iter::repeat(0u8).take((size * size * 4) as usize));
        let name = b"grass";
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&(name.len() as u32).to_le_bytes());
        data.extend_from_slice(name);
        data
    }

    fn fixture() -> (TempDir, FileIndex) {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path().join("game");
        write(
            &game,
            "levels/gridmap/info.json",
            br#"{title = "Grid Map"}"#,
        );
        write(
            &game,
            "levels/gridmap/main/items.level.json",
            concat!(
                r#"{"class": "TerrainBlock", "terrainFile": "flat.ter", "#,
                r#""squareSize": 2, "maxHeight": 512}"#,
                "\n",
                r#"{"class": "DecalRoad", "name": "track", "material": "dirt", "#,
                r#""nodes": ["2 2 50 4", "10 2 50 4", "18 2 50 4"]}"#,
                "\n",
                r#"{"class": "TSStatic", "shapeName": "art/shapes/rock.dae", "#,
                r#""position": "3 3 0"}"#,
                "\n",
                r#"{"class": "SpawnSphere", "position": "0 0 0"}"#,
                "\n",
            )
            .as_bytes(),
        );
        write(&game, "levels/gridmap/flat.ter", &flat_terrain_file(16));
        write(
            &game,
            "levels/gridmap/forest/trees.forest4.json",
            concat!(
                r#"{"type": "pine", "pos": [1, 1, 0], "rotationMatrix": "#,
                r#"[1, 0, 0, 0, 1, 0, 0, 0, 1], "scale": 1.5}"#,
                "\n",
            )
            .as_bytes(),
        );
        let options = ScanOptions {
            game_root: Some(game),
            user_dir: None,
            cache_root: dir.path().join("cache"),
        };
        let index = scan(&options);
        (dir, index)
    }

    #[test]
    fn lists_levels_with_titles() {
        let (_dir, index) = fixture();
        let levels = list_levels(&index);
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].name, "gridmap");
        assert_eq!(levels[0].title, "Grid Map");
    }

    #[test]
    fn builds_terrain_roads_and_batches() {
        let (_dir, index) = fixture();
        let scene = build_level(&index, "gridmap", &mut Progress::new()).unwrap();

        assert_eq!(scene.terrain.len(), 1);
        assert_eq!(scene.terrain[0].mesh.faces.len(), 15 * 15);
        assert_eq!(scene.decal_roads.len(), 1);
        assert_eq!(scene.forest.len(), 1);
        assert_eq!(scene.forest[0].type_name, "pine");
        assert_eq!(scene.statics.len(), 1);
        assert_eq!(scene.statics[0].type_name, "rock.dae");

        assert_eq!(scene.class_counts["TerrainBlock"], 1);
        assert_eq!(scene.class_counts["SpawnSphere"], 1);

        // The road drapes onto the terrain surface, not its spline height.
        let road = &scene.decal_roads[0].mesh;
        let surface = 64.0 * (512.0 / 65536.0);
        assert!(road.positions.iter().all(|p| (p.z - surface).abs() < 0.1));
    }

    #[test]
    fn unknown_level_is_an_error() {
        let (_dir, index) = fixture();
        assert!(build_level(&index, "nosuch", &mut Progress::new()).is_err());
    }

    #[test]
    fn script_fallback_parses_mission_files() {
        let dir = tempfile::tempdir().unwrap();
        let game = dir.path().join("game");
        write(
            &game,
            "levels/old/old.mis",
            br#"new TSStatic(rock01) {
                shapeName = "art/shapes/rock.dae";
                position = "10 20 0.5";
            };"#,
        );
        let options = ScanOptions {
            game_root: Some(game),
            user_dir: None,
            cache_root: dir.path().join("cache"),
        };
        let index = scan(&options);
        let records = load_main_records(&index, "levels/old");
        assert_eq!(records.len(), 1);
        assert_eq!(record_class(&records[0]), Some("TSStatic"));
        assert_eq!(
            records[0].get("shapeName").and_then(Value::as_str),
            Some("art/shapes/rock.dae")
        );
    }

    #[test]
    fn decal_instances_fall_back_to_packed_container() {
        let (dir, _) = fixture();
        let game = dir.path().join("game");
        let mut packed = Vec::new();
        packed.extend_from_slice(b"TDDF");
        packed.push(1);
        packed.extend_from_slice(&1u32.to_le_bytes());
        packed.extend_from_slice(&5u32.to_le_bytes());
        packed.extend_from_slice(b"crack");
        packed.extend_from_slice(&1u32.to_le_bytes());
        packed.push(0);
        for f in [4.0f32, 4.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0] {
            packed.extend_from_slice(&f.to_le_bytes());
        }
        packed.extend_from_slice(&0i32.to_le_bytes());
        packed.extend_from_slice(&2.0f32.to_le_bytes());
        packed.push(0);
        write(&game, "levels/gridmap/theLevel.decals", &packed);

        let options = ScanOptions {
            game_root: Some(game),
            user_dir: None,
            cache_root: dir.path().join("cache2"),
        };
        let index = scan(&options);
        let (_defs, instances) = load_decal_sets(&index, "levels/gridmap");
        assert_eq!(instances["crack"].len(), 1);

        let scene = build_level(&index, "gridmap", &mut Progress::new()).unwrap();
        assert_eq!(scene.decals.len(), 1);
        assert!(!scene.decals[0].mesh.is_empty());
    }
}
