use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use beamlevel::{build_level, list_levels, scan, Progress, ScanOptions};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let options = CliOptions::parse()?;
    let index = scan(&ScanOptions {
        game_root: Some(options.game_root.clone()),
        user_dir: options.user_dir.clone(),
        cache_root: options.cache_root(),
    });

    if options.index_stats {
        println!(
            "Indexed {} files ({} from zips, {} on disk)",
            index.total_files(),
            index.zip_count(),
            index.dir_count()
        );
    }

    if options.list || options.level.is_none() {
        let levels = list_levels(&index);
        println!("Found {} level(s)", levels.len());
        for level in &levels {
            println!(" - {} ({})", level.name, level.title);
        }
    }

    let Some(name) = &options.level else {
        return Ok(());
    };

    let mut progress = Progress::new();
    let scene = build_level(&index, name, &mut progress)?;

    println!("Level {}:", scene.name);
    for (class, count) in &scene.class_counts {
        println!("  {count:>6} {class}");
    }
    println!(
        "Generated {} meshes ({} triangles)",
        scene.mesh_count(),
        scene.triangle_count()
    );
    for mesh in scene.meshes() {
        println!(
            " - {}: {} verts, {} faces",
            mesh.name,
            mesh.mesh.positions.len(),
            mesh.mesh.faces.len()
        );
    }
    for batch in scene.forest.iter().chain(&scene.statics) {
        println!(" - {}: {} instances", batch.type_name, batch.len());
    }
    Ok(())
}

struct CliOptions {
    game_root: PathBuf,
    user_dir: Option<PathBuf>,
    list: bool,
    level: Option<String>,
    index_stats: bool,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        let mut args = env::args().skip(1);
        let Some(game_root) = args.next() else {
            return Err(anyhow!(
                "Usage: beamlevel <game_root> [--user <dir>] [--list] [--level <name>] [--index-stats]"
            ));
        };
        let mut options = Self {
            game_root: PathBuf::from(game_root),
            user_dir: None,
            list: false,
            level: None,
            index_stats: false,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--user" => {
                    let dir = args.next().ok_or_else(|| anyhow!("--user needs a directory"))?;
                    options.user_dir = Some(PathBuf::from(dir));
                }
                "--list" => options.list = true,
                "--level" => {
                    let name = args.next().ok_or_else(|| anyhow!("--level needs a name"))?;
                    options.level = Some(name);
                }
                "--index-stats" => options.index_stats = true,
                other => {
                    return Err(anyhow!(
                        "Unknown argument: {other}. Expected --user, --list, --level or --index-stats"
                    ));
                }
            }
        }
        Ok(options)
    }

    /// Extraction cache for zip members.
    fn cache_root(&self) -> PathBuf {
        env::temp_dir().join("beamlevel-cache")
    }
}
