//! `pixelgym run` and `pixelgym specs`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    anyhow::{Context, Result},
    clap::Args,
    pixelgym_config::PixelgymConfig,
    pixelgym_env::{Env, EnvOptions, EnvSpec, ErrorKind, SpecCatalog},
    tracing::{info, warn},
};

use crate::agent::RandomAgent;

#[derive(Args)]
pub struct RunArgs {
    /// Game to play, by spec name.
    #[arg(long)]
    name: String,
    /// JSON spec catalog (defaults to `spec_catalog` from config).
    #[arg(long)]
    spec_file: Option<PathBuf>,
    /// Episodes to play (defaults to `run.episodes`).
    #[arg(long)]
    episodes: Option<u32>,
    /// Step limit per episode (defaults to `run.max_steps`).
    #[arg(long)]
    max_steps: Option<u32>,
    /// Milliseconds of game time per step (defaults to `run.step_ms`).
    #[arg(long)]
    step_ms: Option<u64>,
    /// Directory for the final observation of each episode.
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

/// Effective run settings after merging flags over config.
#[derive(Debug, Clone, PartialEq)]
struct RunPlan {
    episodes: u32,
    max_steps: u32,
    step: Duration,
    save_dir: Option<PathBuf>,
}

impl RunPlan {
    fn new(args: &RunArgs, config: &PixelgymConfig) -> Self {
        Self {
            episodes: args.episodes.unwrap_or(config.run.episodes),
            max_steps: args.max_steps.unwrap_or(config.run.max_steps),
            step: Duration::from_millis(args.step_ms.unwrap_or(config.run.step_ms)),
            save_dir: args.save_dir.clone().or_else(|| config.run.save_dir.clone()),
        }
    }
}

fn load_catalog(spec_file: Option<PathBuf>, config: &PixelgymConfig) -> Result<SpecCatalog> {
    let path = spec_file
        .or_else(|| config.spec_catalog.clone())
        .context("no spec catalog given: pass --spec-file or set spec_catalog in config")?;
    SpecCatalog::load(&path).with_context(|| format!("loading spec catalog {}", path.display()))
}

pub async fn handle_run(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    let config = pixelgym_config::load_or_discover(config_path)?;
    let catalog = load_catalog(args.spec_file.clone(), &config)?;
    let spec = catalog
        .find(&args.name)
        .cloned()
        .with_context(|| format!("no spec named {:?} in catalog", args.name))?;
    let plan = RunPlan::new(&args, &config);
    if let Some(dir) = &plan.save_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;
    }

    let options = EnvOptions::from(&config.env);
    info!(env = %spec.name, external = options.is_external(), "creating environment");
    let mut env = Env::new(&spec, options).await?;

    let outcome = tokio::select! {
        result = play(&mut env, &spec, &plan) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, closing environment");
            Ok(())
        },
    };
    let closed = env.close().await;

    outcome?;
    closed?;
    Ok(())
}

async fn play(env: &mut Env, spec: &EnvSpec, plan: &RunPlan) -> Result<()> {
    let mut agent = RandomAgent::new(spec);
    let mut rng = rand::rng();

    for episode in 1..=plan.episodes {
        if let Err(e) = env.reset().await {
            if e.kind() == ErrorKind::NotFound {
                for line in env.log() {
                    warn!(line = %line, "page console");
                }
            }
            return Err(e.into());
        }

        let mut total = 0.0;
        let mut steps = 0;
        let mut done = false;
        while steps < plan.max_steps && !done {
            let mut events = agent.act(&mut rng);
            if steps + 1 == plan.max_steps {
                events.extend(agent.release_all());
            }
            let outcome = env.step(plan.step, &events).await?;
            total += outcome.reward;
            done = outcome.done;
            steps += 1;
        }
        if done {
            // The next reset starts with nothing held.
            agent.release_all();
        }
        info!(episode, steps, total_reward = total, done, "episode finished");

        if let Some(dir) = &plan.save_dir {
            let obs = env.observe().await?;
            let path = dir.join(format!("{}-ep{episode}.{}", spec.name, obs.extension()));
            tokio::fs::write(&path, obs.bytes())
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "saved final observation");
        }
    }
    Ok(())
}

pub fn handle_specs(spec_file: Option<PathBuf>, config_path: Option<&Path>) -> Result<()> {
    let config = pixelgym_config::load_or_discover(config_path)?;
    let catalog = load_catalog(spec_file, &config)?;
    if catalog.is_empty() {
        println!("No specs found.");
        return Ok(());
    }
    for spec in catalog.iter() {
        println!("{}", describe(spec));
    }
    Ok(())
}

fn describe(spec: &EnvSpec) -> String {
    let mut line = format!("{:<32} {}x{}", spec.name, spec.width, spec.height);
    if spec.variant_of.is_some() {
        line.push_str(&format!(" variant of {}", spec.base_name()));
    }
    if spec.all_canvas {
        line.push_str(" canvas");
    }
    if !spec.key_whitelist.is_empty() {
        line.push_str(&format!(" keys: {}", spec.key_whitelist.join(",")));
    }
    line
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> RunArgs {
        RunArgs {
            name: "Knot-v0".into(),
            spec_file: None,
            episodes: None,
            max_steps: Some(20),
            step_ms: None,
            save_dir: None,
        }
    }

    #[test]
    fn flags_override_config() {
        let mut config = PixelgymConfig::default();
        config.run.episodes = 3;
        config.run.save_dir = Some("/tmp/frames".into());
        let plan = RunPlan::new(&args(), &config);
        assert_eq!(plan, RunPlan {
            episodes: 3,
            max_steps: 20,
            step: Duration::from_millis(100),
            save_dir: Some("/tmp/frames".into()),
        });
    }

    #[test]
    fn catalog_path_is_required() {
        let err = load_catalog(None, &PixelgymConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--spec-file"));
    }

    #[test]
    fn catalog_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("specs.json");
        std::fs::write(
            &path,
            r#"[{"Name": "Knot-v0", "Width": 84, "Height": 84, "KeyWhitelist": ["Space"]}]"#,
        )
        .unwrap();
        let config = PixelgymConfig {
            spec_catalog: Some(path),
            ..PixelgymConfig::default()
        };
        let catalog = load_catalog(None, &config).unwrap();
        assert!(catalog.find("Knot-v0").is_some());
    }

    #[test]
    fn describe_lists_traits() {
        let spec = EnvSpec::new("Knot-Hard-v0", 84, 84)
            .with_variant_of("Knot")
            .with_all_canvas(true)
            .with_keys(["ArrowLeft", "Space"]);
        let line = describe(&spec);
        assert!(line.starts_with("Knot-Hard-v0"));
        assert!(line.ends_with("84x84 variant of Knot canvas keys: ArrowLeft,Space"));
    }
}
