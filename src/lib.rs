use {
    anyhow::{Context, Error, anyhow, bail, ensure},
    arguments::Arguments,
    async_trait::async_trait,
    block_template::{BlockTemplate, RawTemplate},
    clap::Parser,
    cluster::{ClusterMessage, Coordinator, WorkerMessage},
    coin::{Coin, Keccak},
    connection::Connection,
    daemon::{Daemon, RpcDaemon},
    dashmap::DashMap,
    derive_more::Display,
    difficulty::{Difficulty, pow_difficulty},
    futures::{SinkExt, StreamExt},
    job::Job,
    jobs::{JobFormat, JobHistory, job_format},
    login::{LoginError, ParsedLogin, PoolType},
    options::Options,
    parking_lot::Mutex,
    primitive_types::U256,
    protocol::{
        Id, JobPayload, LoginParams, Nonce, Push, RejectReason, Request, Response, SubmitParams,
    },
    rand::RngCore,
    ring::Ring,
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    session::Session,
    settings::{BanSettings, PortSettings, Settings},
    sink::{PortStatus, Report, unix_millis},
    snafu::Snafu,
    std::{
        collections::{HashMap, HashSet, VecDeque},
        env,
        fmt::{self, Display, Formatter},
        fs, io,
        net::{IpAddr, SocketAddr},
        path::PathBuf,
        process,
        str::FromStr,
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering},
        },
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    subcommand::Subcommand,
    templates::TemplateStore,
    tokio::{
        net::TcpListener,
        runtime::Runtime,
        sync::mpsc,
        task::JoinSet,
        time::{MissedTickBehavior, interval, sleep},
    },
    tokio_util::{
        codec::{FramedRead, FramedWrite, LinesCodec},
        sync::CancellationToken,
    },
    tracing::{debug, error, info, warn},
    trust::{Trust, TrustSettings},
    uuid::Uuid,
    vardiff::Retarget,
    worker::{WorkerRuntime, spawn_worker},
};

mod arguments;
pub mod block_template;
mod cluster;
pub mod coin;
mod connection;
pub mod daemon;
pub mod difficulty;
mod job;
mod jobs;
pub mod login;
mod logs;
mod options;
pub mod protocol;
pub mod ring;
mod session;
pub mod settings;
mod signal;
pub mod sink;
mod subcommand;
mod templates;
pub mod trust;
mod validator;
pub mod vardiff;
mod worker;

pub const USER_AGENT: &str = "remora/0.3.1";

/// A connection buffering this much without a newline is abusive.
pub const MAX_REQUEST_SIZE: usize = 10 * 1024;

/// Retired block templates kept resolvable for late shares.
pub const RETAINED_TEMPLATES: usize = 4;

/// Jobs retained per session; older job ids expire naturally.
pub const RETAINED_JOBS: usize = 10;

/// Share-interval samples feeding the vardiff timing fallback.
pub const SHARE_INTERVAL_SAMPLES: usize = 8;

/// Bytes reserved in the template blob for the per-job extra-nonce.
pub const TEMPLATE_RESERVE_SIZE: usize = 8;

/// Concurrent senders draining the report queue.
pub const REPORT_SENDERS: usize = 32;

pub const REPORT_CHANNEL_CAPACITY: usize = 10_000;
pub const CLUSTER_CHANNEL_CAPACITY: usize = 1_024;

pub const HEALTHCHECK_BODY: &str = "Mining Pool Online";

type Result<T = (), E = Error> = std::result::Result<T, E>;

pub fn main() {
    let _guard = logs::init();

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
