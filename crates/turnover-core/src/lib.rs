pub mod aggregate;
pub mod api;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod indicator;
pub mod loader;
pub mod render;
pub mod task;
pub mod timeline;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting turnover CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.config.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    datastore::FileKeyValueStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open state store at \
         {}",
        data_dir.display()
      )
    })?;

  let renderer =
    render::Renderer::new(&cfg)?;
  let timezone =
    datetime::resolve_timezone(
      cfg.get("timezone").as_deref()
    );
  let clock =
    datetime::Clock::system(timezone);
  debug!(
    timezone = %clock.timezone,
    today = %clock.today,
    "resolved clock"
  );

  let ctx = commands::CommandContext {
    cfg: &cfg,
    store: &store,
    renderer: &renderer,
    clock
  };
  commands::dispatch(&ctx, cli.command)?;

  info!("done");
  Ok(())
}
