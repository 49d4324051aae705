//! Bringing a worker from raw pipes to a running node.
//!
//! [`Core::bootstrap`] performs every step in a fixed order:
//!
//! 1. create the root arena
//! 2. read the initial configuration from the supervisor
//! 3. acknowledge with the sync magic and attach the log stream
//! 4. derive the node identity from the private key
//! 5. construct the collaborators, each with its own child arena:
//!    crypto sessions, switch, DHT dispatch chain, ducttape, switch
//!    pinger, interface controller
//! 6. register every admin method, then freeze the table
//!
//! Any failure is fatal and is returned before the event loop starts.
//! Failures after the acknowledgement are also written to the supervisor
//! as a final `ERROR` log record.

use std::fmt;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::admin::{AdminReply, AdminTable, FrozenAdminTable};
use crate::angel::frame::FrameReader;
use crate::angel::{
    BootstrapConfig, LogSwitch, Outbound, SupervisorChannel, SyncMagic, report_fatal,
};
use crate::arena::{Arena, ArenaStats, FailsafeHandler};
use crate::benc::Dict;
use crate::config::CoreConfig;
use crate::dht::{DispatchChain, NodeStore, ReplyModule, RouterModule, SerializationModule};
use crate::error::Result;
use crate::identity::NodeIdentity;
use crate::node::{
    CryptoAuth, Ducttape, InterfaceController, NullTun, SwitchCore, SwitchPinger,
    TunConfigurator, security, tun,
};

/// Knobs for [`Core::bootstrap`]
#[derive(Clone)]
pub struct BootstrapOptions {
    /// Process limits
    pub config: CoreConfig,
    /// Where log records go before and after the handshake
    pub log_switch: LogSwitch,
    /// Runs when the arena ceiling is crossed
    pub failsafe: Option<FailsafeHandler>,
    /// Backs `Core_initTunnel`
    pub tun: Arc<dyn TunConfigurator>,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            config: CoreConfig::default(),
            log_switch: LogSwitch::new(),
            failsafe: None,
            tun: Arc::new(NullTun),
        }
    }
}

impl fmt::Debug for BootstrapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapOptions")
            .field("config", &self.config)
            .field("custom_failsafe", &self.failsafe.is_some())
            .finish_non_exhaustive()
    }
}

impl BootstrapOptions {
    /// Builder: process limits
    #[must_use]
    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Builder: log switch shared with the subscriber
    #[must_use]
    pub fn with_log_switch(mut self, log_switch: LogSwitch) -> Self {
        self.log_switch = log_switch;
        self
    }

    /// Builder: failsafe handler for the root arena
    #[must_use]
    pub fn with_failsafe(mut self, failsafe: FailsafeHandler) -> Self {
        self.failsafe = Some(failsafe);
        self
    }

    /// Builder: TUN configurator
    #[must_use]
    pub fn with_tun(mut self, tun: Arc<dyn TunConfigurator>) -> Self {
        self.tun = tun;
        self
    }
}

/// Register `ping`, `Core_exit` and `memory`.
///
/// # Errors
///
/// [`crate::FatalError::DuplicateAdminMethod`] if any name is taken.
pub fn register_core_methods(table: &mut AdminTable, stats: ArenaStats) -> Result<()> {
    table.register("ping", false, |_: &Dict| {
        Ok(AdminReply::Message(Dict::new().with("q", "pong")))
    })?;
    table.register("Core_exit", true, |_: &Dict| {
        tracing::info!("exit requested over admin");
        Ok(AdminReply::Exit(1))
    })?;
    table.register("memory", false, move |_: &Dict| {
        Ok(AdminReply::Message(
            Dict::new().with("bytes", stats.bytes_allocated()),
        ))
    })
}

struct Assembled {
    identity: Arc<NodeIdentity>,
    admin: FrozenAdminTable,
    ducttape: Arc<Ducttape>,
    interfaces: Arc<InterfaceController>,
}

/// Steps 4 to 6; runs after the acknowledgement, so failures here must
/// reach the supervisor as a log record.
fn assemble(
    boot: BootstrapConfig,
    config: &CoreConfig,
    root: &Arena,
    tun_configurator: Arc<dyn TunConfigurator>,
) -> Result<Assembled> {
    let identity = Arc::new(NodeIdentity::derive(&boot.private_key)?);
    tracing::info!("this node's address is {}", identity.address());

    let crypto_auth = Arc::new(CryptoAuth::new(boot.private_key, root.child("crypto-auth")));
    let switch = Arc::new(SwitchCore::new(root.child("switch")));

    let store = Arc::new(NodeStore::new(&identity, root.child("node-store")));
    let router = Arc::new(RouterModule::new(Arc::clone(&identity), store));
    let chain = DispatchChain::builder()
        .reply_correlation(ReplyModule::new(root.child("reply")))
        .router(Arc::clone(&router))
        .serialization(SerializationModule::new());

    let ducttape = Arc::new(Ducttape::new(
        Arc::clone(&identity),
        chain,
        Arc::clone(&switch),
        root.child("ducttape"),
    ));
    let pinger = Arc::new(SwitchPinger::new(
        Arc::clone(&switch),
        root.child("switch-pinger"),
    ));
    let interfaces = Arc::new(InterfaceController::new(
        Arc::clone(&switch),
        Arc::clone(&crypto_auth),
        Arc::clone(router.store()),
        root.child("interfaces"),
    ));

    let mut table = AdminTable::new(root.child("admin"));
    pinger.register_admin(&mut table)?;
    interfaces.register_admin(&mut table)?;
    router.register_admin(&mut table)?;
    crypto_auth.register_admin(&mut table)?;
    register_core_methods(&mut table, root.stats())?;
    tun::register_admin(
        &mut table,
        Arc::clone(&identity),
        Arc::clone(&ducttape),
        tun_configurator,
    )?;
    security::register_admin(&mut table)?;
    let method_count = table.len();
    let admin = table.freeze(boot.admin_password, config.cookie_lifetime);

    tracing::info!(
        "bootstrap complete: {} admin methods, {} bytes allocated",
        method_count,
        root.bytes_allocated()
    );

    Ok(Assembled {
        identity,
        admin,
        ducttape,
        interfaces,
    })
}

/// A bootstrapped worker, ready to serve admin requests
pub struct Core<R, W> {
    pub(crate) identity: Arc<NodeIdentity>,
    pub(crate) admin: FrozenAdminTable,
    pub(crate) frames: FrameReader<R>,
    pub(crate) writer: W,
    pub(crate) magic: SyncMagic,
    pub(crate) outbound: Outbound,
    pub(crate) outbound_rx: mpsc::Receiver<Vec<u8>>,
    pub(crate) log_switch: LogSwitch,
    pub(crate) ducttape: Arc<Ducttape>,
    pub(crate) interfaces: Arc<InterfaceController>,
    pub(crate) requests: Arena,
    pub(crate) root: Arena,
}

impl<R, W> fmt::Debug for Core<R, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("identity", &self.identity)
            .field("magic", &self.magic)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl<R, W> Core<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Run every bootstrap step over `channel`.
    ///
    /// # Errors
    ///
    /// Every error here is a [`crate::FatalError`]; the process should
    /// exit with status 1.
    pub async fn bootstrap(
        mut channel: SupervisorChannel<R, W>,
        options: BootstrapOptions,
    ) -> Result<Self> {
        let BootstrapOptions {
            config,
            log_switch,
            failsafe,
            tun: tun_configurator,
        } = options;

        let root = match failsafe {
            Some(handler) => Arena::root_with_failsafe(config.arena_ceiling, handler),
            None => Arena::root(config.arena_ceiling),
        };

        let boot = channel.receive_config(&root, &config).await?;
        let mut link = channel.acknowledge(&config).await?;
        let (outbound, outbound_rx) = Outbound::new(link.magic);
        log_switch.attach(outbound.clone());
        tracing::info!("connected to supervisor");

        let Assembled {
            identity,
            admin,
            ducttape,
            interfaces,
        } = match assemble(boot, &config, &root, tun_configurator) {
            Ok(assembled) => assembled,
            Err(e) => {
                log_switch.detach();
                drop(outbound);
                let reported = report_fatal(&mut link.writer, outbound_rx, link.magic, &e).await;
                if let Err(io) = reported {
                    tracing::debug!("supervisor missed the fatal record: {}", io);
                }
                return Err(e);
            }
        };

        Ok(Self {
            identity,
            admin,
            frames: link.frames,
            writer: link.writer,
            magic: link.magic,
            outbound,
            outbound_rx,
            log_switch,
            ducttape,
            interfaces,
            requests: root.child("admin-requests"),
            root,
        })
    }

    /// The node's identity
    #[must_use]
    pub fn identity(&self) -> &Arc<NodeIdentity> {
        &self.identity
    }

    /// The frozen admin table
    #[must_use]
    pub fn admin(&self) -> &FrozenAdminTable {
        &self.admin
    }

    /// Glue between fabric and DHT
    #[must_use]
    pub fn ducttape(&self) -> &Arc<Ducttape> {
        &self.ducttape
    }

    /// The interface controller
    #[must_use]
    pub fn interfaces(&self) -> &Arc<InterfaceController> {
        &self.interfaces
    }

    /// This run's sync magic
    #[must_use]
    pub fn sync_magic(&self) -> SyncMagic {
        self.magic
    }

    /// Bytes in use across the arena hierarchy
    #[must_use]
    pub fn bytes_allocated(&self) -> usize {
        self.root.bytes_allocated()
    }
}
