use {
    anyhow::{Context, Error, bail, ensure},
    arguments::Arguments,
    block::{Block, BlockTemplate, pending_block_fields},
    clap::Parser,
    dashmap::DashMap,
    derive_more::Display,
    hashrate::HashRate,
    health::Health,
    miner::Miner,
    num_bigint::BigUint,
    num_traits::{One, ToPrimitive, Zero},
    options::Options,
    parking_lot::Mutex,
    rpc::RpcClient,
    serde::{Deserialize, Serialize},
    serde_json::value::RawValue,
    server::ProxyServer,
    settings::Settings,
    sha2::{Digest, Sha256},
    snafu::{ResultExt, Snafu},
    std::{
        collections::BTreeMap,
        env,
        fmt::{self, Formatter},
        ops::Range,
        process,
        str::FromStr,
        sync::{
            Arc, LazyLock,
            atomic::{AtomicU64, AtomicUsize, Ordering},
        },
        time::{Duration, SystemTime, UNIX_EPOCH},
    },
    template::TemplateStore,
    tokio::{
        runtime::Runtime,
        sync::watch,
        task::JoinSet,
        time::{MissedTickBehavior, interval},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
    tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt},
};

mod arguments;
pub mod block;
pub mod difficulty;
pub mod hashrate;
mod health;
mod logs;
pub mod miner;
mod options;
pub mod rpc;
pub mod server;
pub mod settings;
mod signal;
pub mod template;

/// Substituted when a miner declares a malformed or non-positive difficulty.
pub const DEFAULT_SHARE_DIFFICULTY: u64 = 8;

/// Hex length of the fixed header prefix covered by the proof-of-work hash.
/// The trailer past this point carries the nonce padding and is not hashed.
pub const HEADER_HEX_LEN: usize = 360;

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub(crate) fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before unix epoch")
        .as_millis() as u64
}

pub fn main() {
    logs::init();

    let args = Arguments::parse();

    Runtime::new()
        .expect("Failed to create tokio runtime")
        .block_on(async {
            let cancel_token = signal::setup_signal_handler();

            match args.run(cancel_token).await {
                Err(err) => {
                    eprintln!("error: {err}");

                    for (i, cause) in err.chain().skip(1).enumerate() {
                        if i == 0 {
                            eprintln!();
                            eprintln!("because:");
                        }
                        eprintln!("- {cause}");
                    }

                    if env::var_os("RUST_BACKTRACE")
                        .map(|val| val == "1")
                        .unwrap_or_default()
                    {
                        eprintln!();
                        eprintln!("{}", err.backtrace());
                    }
                    process::exit(1);
                }
                Ok(_) => {
                    process::exit(0);
                }
            }
        });
}
