mod config;
mod console;
mod desktop_notifier;
mod diagnostics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use config::{Config, NotifySink};
use console::{ConsoleInput, ConsoleTransport};
use desktop_notifier::DesktopNotifier;
use diagnostics::{BuildInfo, Cli, DiagnosticCommand};
use modem_relay_core::engine::{ModemManagerFactory, SimulatedFactory};
use modem_relay_core::listeners::default_listeners;
use modem_relay_core::{
    ChatTransport, CommandTable, Dispatcher, Engine, EngineRegistry, ListenerContext,
    ListenerSupervisor, MemoryBus, SmsReferenceCache,
};

const SIMULATED_ENGINE: &str = "simulated";

/// Initialized engine, plus the in-memory bus when it is the simulated one
struct EngineHandle {
    engine: Arc<dyn Engine>,
    simulated_bus: Option<Arc<MemoryBus>>,
}

/// Build the registry, create the configured engine and initialize it
async fn start_engine(cli: &Cli, config: &Config) -> Result<EngineHandle> {
    let simulated_bus = Arc::new(MemoryBus::simulated());

    let mut registry = EngineRegistry::new();
    registry.register(Arc::new(ModemManagerFactory))?;
    registry.register(Arc::new(SimulatedFactory::new(Arc::clone(&simulated_bus))))?;

    let name = if cli.simulate {
        SIMULATED_ENGINE
    } else {
        config.engine.name.as_str()
    };

    let mut engine = registry
        .create(name, &config.engine_options())
        .context("Failed to create engine")?;
    engine
        .init()
        .await
        .with_context(|| format!("Failed to initialize engine '{}'", name))?;

    info!(
        "Engine '{}' ready on {}",
        engine.name(),
        engine.modem().map(|m| m.as_str()).unwrap_or("-")
    );

    Ok(EngineHandle {
        simulated_bus: (name == SIMULATED_ENGINE).then_some(simulated_bus),
        engine: Arc::from(engine),
    })
}

/// Main daemon state
struct Daemon {
    config: Config,
    engine: Arc<dyn Engine>,
    dispatcher: Arc<Dispatcher>,
    console: Arc<ConsoleTransport>,
    notifier: Arc<dyn ChatTransport>,
    simulated_bus: Option<Arc<MemoryBus>>,
    supervisor: Option<ListenerSupervisor>,
}

impl Daemon {
    async fn new(config: Config, handle: EngineHandle) -> Result<Self> {
        let console = Arc::new(ConsoleTransport::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&handle.engine),
            Arc::new(SmsReferenceCache::new()),
            CommandTable::standard()?,
            config.admin_chat(),
        ));

        let desktop = match config.chat.notify {
            NotifySink::Console => None,
            NotifySink::Desktop => match DesktopNotifier::new().await {
                Ok(notifier) => Some(notifier),
                Err(e) => {
                    warn!("Desktop notifications unavailable, using console: {:#}", e);
                    None
                }
            },
        };
        let notifier: Arc<dyn ChatTransport> = match desktop {
            Some(notifier) => Arc::new(notifier),
            None => console.clone(),
        };

        Ok(Self {
            config,
            engine: handle.engine,
            dispatcher,
            console,
            notifier,
            simulated_bus: handle.simulated_bus,
            supervisor: None,
        })
    }

    /// Start the call and SMS listeners
    async fn start_listeners(&mut self) -> Result<()> {
        let Some(source) = self.engine.event_source() else {
            warn!("Engine '{}' has no event source, listeners disabled", self.engine.name());
            return Ok(());
        };

        let listeners = default_listeners(
            self.config.listeners.enable_calls,
            self.config.listeners.enable_sms,
            self.config.listeners.delete_after_forward,
        );
        if listeners.is_empty() {
            info!("All listeners disabled in configuration");
            return Ok(());
        }

        let ctx = Arc::new(ListenerContext {
            source,
            transport: Arc::clone(&self.notifier),
            notify_chat: self.config.admin_chat(),
        });
        let supervisor = ListenerSupervisor::start(listeners, ctx)
            .await
            .context("Failed to subscribe to modem events")?;
        info!("Listeners running: {}", supervisor.running().join(", "));
        self.supervisor = Some(supervisor);
        Ok(())
    }

    /// Read console input until Ctrl+C
    async fn run(&self) -> Result<()> {
        info!("Modem relay running, admin chat {}", self.config.admin_chat());
        info!("Type /help for commands, Ctrl+C to stop");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdin_open = true;
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    result.context("Failed to listen for Ctrl+C")?;
                    info!("Received shutdown signal");
                    return Ok(());
                }
                line = lines.next_line(), if stdin_open => match line {
                    Ok(Some(line)) => self.handle_line(&line).await,
                    Ok(None) => {
                        debug!("Console input closed");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!("Failed to read console input: {}", e);
                        stdin_open = false;
                    }
                },
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        match ConsoleInput::parse(line, self.config.admin_chat()) {
            ConsoleInput::Command(request) => {
                let dispatcher = Arc::clone(&self.dispatcher);
                let console = Arc::clone(&self.console);
                tokio::spawn(async move {
                    let Some(reply) = dispatcher.dispatch(&request).await else {
                        debug!("Ignoring unknown command /{}", request.command);
                        return;
                    };
                    if let Err(e) = console.deliver(request.chat, &reply).await {
                        error!("Failed to deliver reply: {}", e);
                    }
                });
            }
            ConsoleInput::InjectSms { number, text } => match &self.simulated_bus {
                Some(bus) => {
                    let modem = self.simulated_modem();
                    let path = bus.receive_sms(&modem, &number, &text).await;
                    debug!("Injected SMS {}", path);
                }
                None => self.console.print("Event injection needs the simulated engine."),
            },
            ConsoleInput::InjectCall { number } => match &self.simulated_bus {
                Some(bus) => {
                    let modem = self.simulated_modem();
                    let path = bus.ring(&modem, &number).await;
                    debug!("Injected call {}", path);
                }
                None => self.console.print("Event injection needs the simulated engine."),
            },
            ConsoleInput::Empty => {}
            ConsoleInput::Invalid(reason) => self.console.print(&reason),
        }
    }

    fn simulated_modem(&self) -> String {
        self.engine
            .modem()
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }

    async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down modem relay...");

        if let Some(supervisor) = self.supervisor.take() {
            supervisor.shutdown().await;
            info!("Listeners stopped");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

async fn handle_diagnostic_command(cli: &Cli, command: &DiagnosticCommand) -> Result<()> {
    match command {
        DiagnosticCommand::Version { verbose } => {
            BuildInfo::get().display(*verbose);
            Ok(())
        }
        DiagnosticCommand::DumpConfig => {
            let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
            let path = cli.config.clone().unwrap_or_else(Config::default_path);
            println!("# {}", path.display());
            print!(
                "{}",
                toml::to_string_pretty(&config).context("Failed to serialize config")?
            );
            Ok(())
        }
        DiagnosticCommand::Status { json } => {
            let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
            let handle = start_engine(cli, &config).await?;
            let report = handle.engine.status().await.context("Failed to read status")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.render());
            }
            Ok(())
        }
        DiagnosticCommand::ListSms => {
            let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
            let handle = start_engine(cli, &config).await?;
            let listing = handle.engine.list_sms().await.context("Failed to list messages")?;
            println!("{}", listing.render());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    diagnostics::init_logging(&cli).context("Failed to initialize logging")?;

    if let Some(command) = &cli.command {
        return handle_diagnostic_command(&cli, command).await;
    }

    info!("Starting modem relay daemon...");

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    info!("Configuration loaded");
    info!(
        "Engine: {}",
        if cli.simulate { SIMULATED_ENGINE } else { config.engine.name.as_str() }
    );
    if config.chat.admin_chat_id == 0 {
        warn!("No admin chat configured; the console acts as chat 0");
    }

    let handle = start_engine(&cli, &config).await?;

    let mut daemon = Daemon::new(config, handle)
        .await
        .context("Failed to create daemon")?;

    daemon
        .start_listeners()
        .await
        .context("Failed to start listeners")?;

    let result = daemon.run().await;

    daemon.shutdown().await?;

    result
}
