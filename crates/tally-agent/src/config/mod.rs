//! Agent config loader (strict parsing).

pub mod schema;

use std::fs;

use tally_core::error::{Result, TallyError};

pub use schema::{AgentConfig, ExportFormat, ExportSection, LabelConfig, LimitsSection, MetricConfig};

pub fn load_from_file(path: &str) -> Result<AgentConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| TallyError::Internal(format!("read config failed ({path}): {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<AgentConfig> {
    let cfg: AgentConfig = serde_yaml::from_str(s)
        .map_err(|e| TallyError::Configuration(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
