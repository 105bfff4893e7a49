// SPDX-License-Identifier: CEPL-1.0
//! Offline GLSL -> SPIR-V compiler for the renderer's shader pair.
//!
//! Every `*.vert` / `*.frag` under the source directory is compiled to
//! `<stage>.spv` in the output directory, which is where the renderer looks
//! for `vert.spv` and `frag.spv` at startup.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "rpg-shaderc", about = "Compile GLSL shaders to SPIR-V")]
struct Args {
    /// Directory containing GLSL sources
    #[arg(long, default_value = "shaders")]
    src: PathBuf,

    /// Directory receiving the .spv files
    #[arg(long, default_value = "spirv")]
    out: PathBuf,

    /// Skip optimization (keeps debug info)
    #[arg(long)]
    debug: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            _ => None,
        }
    }

    fn output_name(self) -> &'static str {
        match self {
            Self::Vertex => "vert.spv",
            Self::Fragment => "frag.spv",
        }
    }

    fn kind(self) -> shaderc::ShaderKind {
        match self {
            Self::Vertex => shaderc::ShaderKind::Vertex,
            Self::Fragment => shaderc::ShaderKind::Fragment,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct Job {
    source: PathBuf,
    stage: Stage,
}

/// One job per stage; two sources for the same stage would overwrite each other.
fn plan_jobs(mut sources: Vec<PathBuf>) -> Result<Vec<Job>> {
    sources.sort();
    let mut jobs: Vec<Job> = Vec::new();
    for source in sources {
        let Some(stage) = Stage::from_path(&source) else {
            continue;
        };
        if let Some(prev) = jobs.iter().find(|j| j.stage == stage) {
            bail!(
                "{} and {} both produce {}",
                prev.source.display(),
                source.display(),
                stage.output_name()
            );
        }
        jobs.push(Job { source, stage });
    }
    if jobs.is_empty() {
        bail!("no .vert or .frag sources found");
    }
    Ok(jobs)
}

fn compile(args: &Args, jobs: &[Job]) -> Result<()> {
    let comp = shaderc::Compiler::new().context("shaderc compiler unavailable")?;
    let mut opts = shaderc::CompileOptions::new().context("shaderc options unavailable")?;
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    if args.debug {
        opts.set_generate_debug_info();
    } else {
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);
    }

    fs::create_dir_all(&args.out).with_context(|| format!("create {}", args.out.display()))?;

    for job in jobs {
        let src = fs::read_to_string(&job.source)
            .with_context(|| format!("read {}", job.source.display()))?;
        let name = job.source.to_string_lossy();
        let spv = comp
            .compile_into_spirv(&src, job.stage.kind(), &name, "main", Some(&opts))
            .with_context(|| format!("compile {name}"))?;
        if spv.get_num_warnings() > 0 {
            tracing::warn!("{name}: {}", spv.get_warning_messages());
        }
        let dst = args.out.join(job.stage.output_name());
        fs::write(&dst, spv.as_binary_u8()).with_context(|| format!("write {}", dst.display()))?;
        info!("{name} -> {} ({} words)", dst.display(), spv.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    rpg_core::init_tracing();
    let args = Args::parse();

    let sources = fs::read_dir(&args.src)
        .with_context(|| format!("read {}", args.src.display()))?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    let jobs = plan_jobs(sources)?;
    compile(&args, &jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn stage_from_extension() {
        assert_eq!(Stage::from_path(Path::new("shaders/quad.vert")), Some(Stage::Vertex));
        assert_eq!(Stage::from_path(Path::new("quad.frag")), Some(Stage::Fragment));
        assert_eq!(Stage::from_path(Path::new("README.md")), None);
        assert_eq!(Stage::from_path(Path::new("noext")), None);
    }

    #[test]
    fn plans_one_job_per_stage() {
        let jobs = plan_jobs(vec![
            PathBuf::from("shaders/quad.frag"),
            PathBuf::from("shaders/notes.txt"),
            PathBuf::from("shaders/quad.vert"),
        ])
        .unwrap();
        assert_eq!(
            jobs,
            vec![
                Job {
                    source: PathBuf::from("shaders/quad.frag"),
                    stage: Stage::Fragment
                },
                Job {
                    source: PathBuf::from("shaders/quad.vert"),
                    stage: Stage::Vertex
                },
            ]
        );
        assert_eq!(jobs[1].stage.output_name(), "vert.spv");
    }

    #[test]
    fn duplicate_stage_rejected() {
        let err = plan_jobs(vec![PathBuf::from("a.vert"), PathBuf::from("b.vert")]).unwrap_err();
        assert!(err.to_string().contains("vert.spv"));
    }

    #[test]
    fn empty_source_dir_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sources: Vec<PathBuf> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert!(plan_jobs(sources).is_err());
    }

    #[test]
    fn cli_defaults() {
        let args = Args::parse_from(["rpg-shaderc"]);
        assert_eq!(args.src, PathBuf::from("shaders"));
        assert_eq!(args.out, PathBuf::from("spirv"));
        assert!(!args.debug);
    }
}
