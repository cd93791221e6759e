use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use marina::manifest::validate_version;
use marina::options::{find_default_identity_file, parse_env_entry};
use marina::{
    BuildContext, BuildDescriptor, BuildOptions, BuildOrchestrator, BuildOutcome, BuildReport,
    CacheSpec,
};

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Application directory containing meta.yml
    pub app: PathBuf,

    /// SSH private key made available to the build
    #[arg(short = 'i', long, value_name = "FILE", conflicts_with = "default_identity")]
    pub identity_file: Option<PathBuf>,

    /// Use id_rsa or id_dsa from the current directory or ~/.ssh
    #[arg(long)]
    pub default_identity: bool,

    /// Directory for scratch build directories (must be visible to the docker daemon)
    #[arg(short = 'b', long, value_name = "DIR", env = "MARINA_BUILD_DIR")]
    pub build_dir: Option<PathBuf>,

    /// Extra environment variable for the build container (repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    pub env: Vec<(String, String)>,

    /// Also write the compiled archive to this file
    #[arg(long, value_name = "FILE")]
    pub archive: Option<PathBuf>,

    /// Stop after compiling, do not build the runner image
    #[arg(long)]
    pub archive_only: bool,

    /// Version tag, replaces the manifest's `tag`
    #[arg(short = 't', long)]
    pub tag: Option<String>,

    /// Build without a persistent cache
    #[arg(long, conflicts_with_all = ["cache", "rebuild_cache"])]
    pub no_cache: bool,

    /// Cache volume or host directory, optionally with its mount path
    #[arg(long, value_name = "[VOLUME_OR_HOSTPATH][:PATH]")]
    pub cache: Option<String>,

    /// Wipe the cache before building
    #[arg(long)]
    pub rebuild_cache: bool,

    /// Keep the build directory, containers and intermediate images
    #[arg(long)]
    pub skip_cleanup: bool,
}

fn parse_env(entry: &str) -> Result<(String, String), String> {
    parse_env_entry(entry).map_err(|e| e.to_string())
}

impl BuildArgs {
    fn build_context(&self) -> anyhow::Result<BuildContext> {
        let root = match &self.build_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("failed to read the current directory")?,
        };
        if !self.app.is_dir() {
            anyhow::bail!("application directory {} does not exist", self.app.display());
        }

        let mut context = BuildContext::new(root, &self.app);
        if let Some(identity) = &self.identity_file {
            context = context.with_identity_file(identity);
        } else if self.default_identity {
            match find_default_identity_file() {
                Some(identity) => context = context.with_identity_file(identity),
                None => tracing::warn!("could not find a default ssh identity file"),
            }
        }
        Ok(context)
    }

    fn build_options(&self, app_name: &str) -> anyhow::Result<BuildOptions> {
        let cache = if self.no_cache {
            None
        } else {
            let cache = match &self.cache {
                Some(spec) => CacheSpec::parse(spec, app_name)?,
                None => CacheSpec::for_app(app_name),
            };
            Some(cache.with_wipe(self.rebuild_cache))
        };

        Ok(BuildOptions {
            env: self.env.clone(),
            archive_file: self.archive.clone(),
            archive_only: self.archive_only,
            tag: self.tag.as_deref().map(validate_version).transpose()?,
            cache,
            skip_cleanup: self.skip_cleanup,
        })
    }
}

pub async fn execute(args: BuildArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let context = args.build_context()?;
    // manifest problems surface before docker is contacted
    let descriptor = BuildDescriptor::from_file(&context.manifest_path())?;
    let options = args.build_options(descriptor.name())?;

    let engine = global.connect_engine()?;
    let mut orchestrator =
        BuildOrchestrator::new(engine, descriptor, context, options, global.output())?;
    let report = orchestrator.run().await?;

    for line in summary(&report, global.quiet) {
        println!("{}", line);
    }

    match report.outcome {
        BuildOutcome::Succeeded => Ok(()),
        BuildOutcome::Failed(failure) => Err(failure.into()),
    }
}

/// `key=value` lines describing what the build left on the host, none when quiet.
fn summary(report: &BuildReport, quiet: bool) -> Vec<String> {
    let mut lines = Vec::new();
    if quiet {
        return lines;
    }
    if let Some(archive) = &report.archive {
        lines.push(format!("archive={}", archive.display()));
    }
    if let Some(dir) = &report.working_dir {
        lines.push(format!("build directory={}", dir.display()));
    }
    if report.succeeded()
        && let Some(image) = &report.image
    {
        lines.push(format!("created image={}", image));
    }
    lines
}
