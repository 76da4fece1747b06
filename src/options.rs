use super::*;

#[derive(Clone, Default, Debug, Parser)]
pub struct Options {
    #[arg(
        long,
        value_name = "NAME=URL",
        help = "Proxy for the upstream daemon at <URL>, labelled <NAME>. May be repeated; the first healthy upstream serves requests."
    )]
    pub upstream: Vec<String>,

    #[arg(
        long,
        env = "REMORA_UPSTREAM_USERNAME",
        help = "Authenticate to upstream RPC as <UPSTREAM_USERNAME>."
    )]
    pub upstream_username: Option<String>,

    #[arg(
        long,
        env = "REMORA_UPSTREAM_PASSWORD",
        help = "Authenticate to upstream RPC with <UPSTREAM_PASSWORD>."
    )]
    pub upstream_password: Option<String>,

    #[arg(
        long,
        default_value_t = 5,
        help = "Abort upstream requests after <TIMEOUT> seconds."
    )]
    pub timeout: u64,

    #[arg(
        long,
        help = "Relay every valid share to an upstream pool instead of solo mining against a daemon."
    )]
    pub pool: bool,

    #[arg(
        long,
        default_value_t = 2,
        help = "Refresh the block template every <REFRESH_INTERVAL> seconds."
    )]
    pub refresh_interval: u64,

    #[arg(
        long,
        default_value_t = 5,
        help = "Probe upstream health every <CHECK_INTERVAL> seconds."
    )]
    pub check_interval: u64,

    #[arg(
        long,
        default_value_t = 600,
        help = "Estimate miner hashrates over a <HASHRATE_WINDOW> second sliding window."
    )]
    pub hashrate_window: u64,
}
