//! init command - Create an empty workspace data directory

use crate::cli::Context;
use crate::core::config::{Config, ConfigFile, ContentConfig};
use crate::core::types::Language;
use crate::engine::workspace::Workspace;
use crate::ui::output;
use anyhow::{Context as _, Result};

/// Initialize a workspace.
///
/// # Arguments
///
/// * `ctx` - Execution context
/// * `default_language` - Default projection language to write to config
/// * `languages` - Allowed languages to write to config
pub fn init(ctx: &Context, default_language: Option<&str>, languages: &[String]) -> Result<()> {
    let paths = ctx.paths();
    let already_initialized = paths.is_initialized();

    Workspace::init(&paths)
        .with_context(|| format!("Failed to initialize {}", paths.root().display()))?;

    if default_language.is_some() || !languages.is_empty() {
        let default_language = default_language
            .map(Language::new)
            .transpose()
            .context("Invalid default language")?;
        let languages = languages
            .iter()
            .map(|code| Language::new(code.as_str()))
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid language list")?;

        let mut config: ConfigFile = ctx.config()?.workspace.unwrap_or_default();
        config.content = Some(ContentConfig {
            default_language: default_language.map(|l| l.as_str().to_string()),
            languages: (!languages.is_empty())
                .then(|| languages.iter().map(|l| l.as_str().to_string()).collect()),
        });
        let path = Config::write_workspace(&paths, &config).context("Failed to write config")?;
        output::print(format!("Wrote {}", path.display()), ctx.verbosity());
    }

    if already_initialized {
        output::print(
            format!("Workspace at {} is already initialized.", paths.root().display()),
            ctx.verbosity(),
        );
    } else {
        output::print(
            format!("Initialized workspace at {}", paths.root().display()),
            ctx.verbosity(),
        );
    }
    Ok(())
}
