use std::path::PathBuf;

use clap::Args;
use readiness::platform::APP_LABEL;

#[derive(Args, Debug, Clone)]
pub struct WaitAppArgs {
    #[arg(long, default_value = APP_LABEL, help = "Label selecting the application pods")]
    pub label: String,

    #[arg(long, default_value = "todo", help = "Value of the label")]
    pub value: String,

    #[arg(long, default_value_t = 1, help = "Exact number of ready pods to wait for")]
    pub replicas: u32,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, help = "Scenario plan in YAML")]
    pub plan: PathBuf,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Only run scenarios carrying one of these tags"
    )]
    pub tags: Vec<String>,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Never run scenarios carrying one of these tags"
    )]
    pub skip_tags: Vec<String>,
}
