#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
};

use rgfx::{
    multi_pipeline::MacroOdometer,
    shader::ShaderStage,
    shader_cache::{GlslangCompiler, ShaderCache, declared_macros, is_up_to_date},
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

const APP: &str = "rgfx-app";

// ----------------------------------------------------------------
// Entry point
// ----------------------------------------------------------------

fn main() {
    if let Err(e) = try_main() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    match env::args().nth(1).as_deref() {
        Some(task) => execute_graph(task),
        None => {
            eprintln!("Usage: cargo xtask <task>\n");
            eprintln!("Tasks:");
            for task in &all_tasks() {
                eprintln!("  {}", task.name);
            }
            std::process::exit(1);
        }
    }
}

// ----------------------------------------------------------------
// Task graph
// ----------------------------------------------------------------

struct Task {
    name: &'static str,
    deps: &'static [&'static str],
    run: fn() -> Result<()>,
}

fn noop() -> Result<()> {
    Ok(())
}

fn all_tasks() -> Vec<Task> {
    vec![
        Task {
            name: "cargo-build",
            deps: &[],
            run: cargo_build,
        },
        Task {
            name: "compile-shaders",
            deps: &[],
            run: compile_shaders,
        },
        Task {
            name: "copy-exe",
            deps: &["cargo-build"],
            run: copy_exe,
        },
        Task {
            name: "build",
            deps: &["cargo-build", "compile-shaders", "copy-exe"],
            run: noop,
        },
    ]
}

#[derive(Clone, Copy, PartialEq)]
enum Status {
    Succeeded,
    Failed,
    Skipped,
}

fn task_index(tasks: &[Task], name: &str) -> Result<usize> {
    tasks
        .iter()
        .position(|t| t.name == name)
        .ok_or_else(|| format!("unknown task: `{name}`").into())
}

fn collect_topo(
    tasks: &[Task],
    name: &str,
    visited: &mut Vec<bool>,
    order: &mut Vec<usize>,
) -> Result<()> {
    let idx = task_index(tasks, name)?;
    if visited[idx] {
        return Ok(());
    }
    visited[idx] = true;
    for &dep in tasks[idx].deps {
        collect_topo(tasks, dep, visited, order)?;
    }
    order.push(idx);
    Ok(())
}

fn execute_graph(target: &str) -> Result<()> {
    let tasks = all_tasks();
    let mut visited = vec![false; tasks.len()];
    let mut order: Vec<usize> = Vec::new();
    collect_topo(&tasks, target, &mut visited, &mut order)?;

    let mut statuses: Vec<Option<Status>> = vec![None; tasks.len()];

    for &idx in &order {
        let task = &tasks[idx];
        let blocked = task.deps.iter().any(|&dep| {
            tasks
                .iter()
                .position(|t| t.name == dep)
                .is_some_and(|dep_idx| {
                    matches!(statuses[dep_idx], Some(Status::Failed | Status::Skipped))
                })
        });

        if blocked {
            eprintln!("skip: {}", task.name);
            statuses[idx] = Some(Status::Skipped);
            continue;
        }

        match (task.run)() {
            Ok(()) => statuses[idx] = Some(Status::Succeeded),
            Err(e) => {
                eprintln!("failed: {}: {e}", task.name);
                statuses[idx] = Some(Status::Failed);
            }
        }
    }

    let failed: Vec<&str> = order
        .iter()
        .filter(|&&i| statuses[i] == Some(Status::Failed))
        .map(|&i| tasks[i].name)
        .collect();

    if failed.is_empty() {
        Ok(())
    } else {
        Err(format!("{} task(s) failed: {}", failed.len(), failed.join(", ")).into())
    }
}

// ----------------------------------------------------------------
// Task implementations
// ----------------------------------------------------------------

fn workspace_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| "xtask has no parent directory".into())
}

fn run(cmd: &mut Command) -> Result<()> {
    let status = cmd.status()?;
    if !status.success() {
        return Err(format!("command {:?} failed with {}", cmd.get_program(), status).into());
    }
    Ok(())
}

fn cargo_build() -> Result<()> {
    let root = workspace_root()?;
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    run(Command::new(cargo)
        .args(["build", "-p", APP])
        .current_dir(&root))
}

/// Shader sources under `dir`, skipping `exclude`.
fn shader_sources(
    dir: &Path,
    exclude: &Path,
    out: &mut Vec<(ShaderStage, PathBuf)>,
) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path == exclude {
            continue;
        }
        if path.is_dir() {
            shader_sources(&path, exclude, out)?;
        } else if let Some(stage) = ShaderStage::from_path(&path) {
            out.push((stage, path));
        }
    }
    Ok(())
}

/// Fill the app's shader cache with every declared macro combination so
/// the first run does not stall on the compiler.
fn compile_shaders() -> Result<()> {
    let root = workspace_root()?;
    let src_dir = root.join(APP).join("shaders");
    let cache_dir = src_dir.join("cache");
    let cache = ShaderCache::new(&src_dir, &cache_dir, GlslangCompiler::default());

    let mut sources = Vec::new();
    shader_sources(&src_dir, &cache_dir, &mut sources)?;
    sources.sort();

    let mut compiled = 0u32;
    let mut skipped = 0u32;

    for (stage, src) in &sources {
        let limits = declared_macros(&fs::read_to_string(src)?);
        for macros in MacroOdometer::new(&limits) {
            let dst = cache.spirv_path(src, &macros);
            if is_up_to_date(src, &dst) {
                skipped += 1;
                continue;
            }

            println!(
                "Compiling {} -> {}",
                src.strip_prefix(&src_dir).unwrap_or(src).display(),
                dst.strip_prefix(&cache_dir).unwrap_or(&dst).display(),
            );
            cache.load(*stage, src, &macros)?;
            compiled += 1;
        }
    }

    println!("Shaders: {compiled} compiled, {skipped} up-to-date");
    Ok(())
}

fn copy_if_changed(src: &Path, dst: &Path) -> Result<bool> {
    if is_up_to_date(src, dst) {
        return Ok(false);
    }
    fs::copy(src, dst)?;
    Ok(true)
}

fn copy_exe() -> Result<()> {
    let root = workspace_root()?;
    let out_dir = root.join("out").join(APP).join("debug");
    fs::create_dir_all(&out_dir)?;

    let exe_name = format!("{APP}{}", env::consts::EXE_SUFFIX);
    let src_exe = root.join("target").join("debug").join(&exe_name);
    let dst_exe = out_dir.join(&exe_name);

    if copy_if_changed(&src_exe, &dst_exe)? {
        println!("Copied {exe_name}");
    } else {
        println!("Up-to-date: {exe_name}");
    }

    #[cfg(windows)]
    {
        let src_pdb = root.join("target").join("debug").join("rgfx_app.pdb");
        let dst_pdb = out_dir.join("rgfx_app.pdb");
        copy_if_changed(&src_pdb, &dst_pdb)?;
    }

    Ok(())
}
