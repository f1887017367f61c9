use std::collections::HashSet;
use std::env;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;

use crate::core::Family;

/// Environment variable holding the comma-separated family allow-list.
pub const FAMILIES_VAR: &str = "INSTRUCTION_BUS_FAMILIES";

/// Environment variable toggling the `tracing` mirror of side-channel messages.
pub const TRACE_VAR: &str = "INSTRUCTION_BUS_TRACE";

/// Dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig<F: Family> {
    families: HashSet<F>,
    trace_diagnostics: bool,
}

impl<F: Family> DispatcherConfig<F> {
    /// Route exactly these families.
    pub fn new(families: impl IntoIterator<Item = F>) -> Self {
        Self {
            families: families.into_iter().collect(),
            trace_diagnostics: true,
        }
    }

    /// Add one family to the allow-list.
    pub fn with_family(mut self, family: F) -> Self {
        self.families.insert(family);
        self
    }

    /// Enable or disable mirroring side-channel messages to `tracing`.
    pub fn with_trace_diagnostics(mut self, enabled: bool) -> Self {
        self.trace_diagnostics = enabled;
        self
    }

    pub fn families(&self) -> &HashSet<F> {
        &self.families
    }

    pub fn allows(&self, family: F) -> bool {
        self.families.contains(&family)
    }

    pub fn trace_diagnostics(&self) -> bool {
        self.trace_diagnostics
    }
}

impl<F> DispatcherConfig<F>
where
    F: Family + FromStr,
    F::Err: fmt::Display,
{
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw = lookup(FAMILIES_VAR).context("INSTRUCTION_BUS_FAMILIES must be set")?;

        let mut families = HashSet::new();
        for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            let family = name
                .parse::<F>()
                .map_err(|e| anyhow::anyhow!("{e}"))
                .with_context(|| format!("INSTRUCTION_BUS_FAMILIES: unknown family {name:?}"))?;
            families.insert(family);
        }
        if families.is_empty() {
            bail!("INSTRUCTION_BUS_FAMILIES must name at least one family");
        }

        let trace_diagnostics = match lookup(TRACE_VAR) {
            None => true,
            Some(value) => parse_flag(&value)
                .with_context(|| format!("INSTRUCTION_BUS_TRACE must be a boolean, got {value:?}"))?,
        };

        Ok(Self {
            families,
            trace_diagnostics,
        })
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("unrecognized flag value {other:?}"),
    }
}
