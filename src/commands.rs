//! Subcommands of the `cacheword` binary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use tracing::info;

use crate::attach::CacheSubscriber;
use crate::attach::CacheWordHandle;
use crate::attach::ConnectionState;
use crate::attach::LocalServiceBinder;
use crate::cache::CacheEvent;
use crate::cache::LockTimeout;
use crate::cache::SecretCache;
use crate::config::cli_args::Args;
use crate::config::cli_args::Command;
use crate::config::data_directory::DataDirectory;
use crate::config::settings::CacheSettings;
use crate::crypto::calibrator::Pbkdf2Timer;
use crate::crypto::KdfIterationCalibrator;
use crate::crypto::SerializedSecret;
use crate::prompt::PassphrasePrompt;
use crate::prompt::NEW_PASSPHRASE_ENV_VAR;
use crate::prompt::PASSPHRASE_ENV_VAR;
use crate::store::FileSecretStore;
use crate::store::SecretStore;

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Logs lock state changes of the command's session.
#[derive(Debug, Clone, Copy)]
struct ConsoleSubscriber;

impl CacheSubscriber for ConsoleSubscriber {
    fn on_locked(&self) {
        info!("cache is locked");
    }

    fn on_unlocked(&self) {
        info!("cache is unlocked");
    }

    fn on_uninitialized(&self) {
        info!("cache has no secret yet");
    }
}

/// Everything a subcommand needs, resolved from args and disk.
struct CommandContext {
    data_directory: DataDirectory,
    settings: CacheSettings,
    store: Arc<FileSecretStore>,
}

impl CommandContext {
    fn load(args: &Args) -> Result<Self> {
        let data_directory = DataDirectory::get(args.data_dir.clone())?;
        DataDirectory::create_dir_if_not_exists(&data_directory.root_dir_path())?;

        let mut settings = CacheSettings::load_or_default(&data_directory.settings_file_path())
            .context("Failed to load settings")?;
        args.apply_overrides(&mut settings);
        settings.validate()?;

        let store = FileSecretStore::open(data_directory.secrets_dir_path())
            .context("Failed to open secret store")?;

        Ok(Self {
            data_directory,
            settings,
            store: Arc::new(store),
        })
    }

    /// A cache for this process and a session attached to it.
    async fn connect(&self) -> Result<(SecretCache, CacheWordHandle)> {
        let cache = SecretCache::new(self.settings.lock_timeout(), self.store.is_initialized()?);
        let binder = Arc::new(LocalServiceBinder::new(cache.clone()));
        let handle = CacheWordHandle::new(
            binder,
            self.store.clone(),
            self.settings.kdf,
            Arc::new(ConsoleSubscriber),
        );

        handle.connect().await;
        let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
        while handle.connection_state().await != ConnectionState::Active {
            if tokio::time::Instant::now() >= deadline {
                bail!("Timed out attaching to the secret cache");
            }
            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }

        Ok((cache, handle))
    }
}

pub(crate) async fn run(args: Args) -> Result<()> {
    let ctx = CommandContext::load(&args)?;
    info!("data directory is {}", ctx.data_directory);

    match args.command {
        Command::Init => init(&ctx).await,
        Command::Unlock { hold } => unlock(&ctx, hold).await,
        Command::ChangePassphrase => change_passphrase(&ctx).await,
        Command::Status => status(&ctx),
        Command::Calibrate {
            target_millis,
            samples,
        } => calibrate(&ctx, target_millis, samples).await,
        Command::Settings { save } => settings(&ctx, save),
    }
}

async fn init(ctx: &CommandContext) -> Result<()> {
    if ctx.store.is_initialized()? {
        bail!("A secret already exists in {}", ctx.store.dir().display());
    }

    let passphrase = PassphrasePrompt::new_passphrase_or_env(PASSPHRASE_ENV_VAR)?;
    let (cache, handle) = ctx.connect().await?;

    println!("Deriving key, this takes about a second...");
    handle.initialize(passphrase).await.context("Failed to initialize secret")?;
    println!("Secret created in {}", ctx.store.dir().display());

    handle.disconnect().await;
    cache.shutdown().await;
    Ok(())
}

async fn unlock(ctx: &CommandContext, hold: bool) -> Result<()> {
    let passphrase = PassphrasePrompt::existing_passphrase_or_env()?;
    let (cache, handle) = ctx.connect().await?;

    handle.unlock(passphrase).await.context("Failed to unlock")?;
    println!("Unlocked.");

    if hold {
        let mut events = cache.subscribe();
        println!("Holding the cache open. Press Ctrl-C to release it.");
        tokio::signal::ctrl_c().await?;
        handle.disconnect().await;

        if cache.is_locked().await {
            println!("Locked.");
        } else if ctx.settings.lock_timeout() == LockTimeout::Never {
            println!("Lock timeout is 'never', locking on exit.");
        } else {
            println!(
                "Released. Locking {} (Ctrl-C again to lock now).",
                ctx.settings.lock_timeout()
            );
            tokio::select! {
                _ = wait_for_lock(&mut events) => println!("Locked."),
                _ = tokio::signal::ctrl_c() => {}
            }
        }
    } else {
        handle.disconnect().await;
    }

    cache.shutdown().await;
    Ok(())
}

async fn wait_for_lock(events: &mut tokio::sync::broadcast::Receiver<CacheEvent>) {
    loop {
        match events.recv().await {
            Ok(CacheEvent::Locked) | Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            _ => {}
        }
    }
}

async fn change_passphrase(ctx: &CommandContext) -> Result<()> {
    let current = PassphrasePrompt::existing_passphrase_or_env()?;
    let new_passphrase = PassphrasePrompt::new_passphrase_or_env(NEW_PASSPHRASE_ENV_VAR)?;
    let (cache, handle) = ctx.connect().await?;

    handle
        .change_passphrase(current, new_passphrase)
        .await
        .context("Failed to change passphrase")?;
    println!("Passphrase changed.");

    handle.disconnect().await;
    cache.shutdown().await;
    Ok(())
}

fn status(ctx: &CommandContext) -> Result<()> {
    println!("data directory:    {}", ctx.data_directory);
    println!("lock timeout:      {}", ctx.settings.lock_timeout());

    if !ctx.store.is_initialized()? {
        println!("initialized:       no");
        return Ok(());
    }
    println!("initialized:       yes");

    let Some(blob) = ctx.store.load()? else {
        println!("stored secret:     missing");
        return Ok(());
    };
    let stored = SerializedSecret::parse(&blob).context("Stored secret is unreadable")?;
    println!("format version:    {}", stored.format_version);
    println!("kdf iterations:    {}", stored.kdf_iterations);
    if stored.needs_upgrade(ctx.settings.kdf.min_iterations) {
        println!("upgrade pending:   yes (re-encrypted on next unlock)");
    }
    Ok(())
}

async fn calibrate(ctx: &CommandContext, target_millis: Option<u64>, samples: Option<usize>) -> Result<()> {
    let kdf = ctx.settings.kdf;
    let target = target_millis.map_or_else(|| kdf.calibration_target(), Duration::from_millis);
    let samples = samples.unwrap_or(kdf.calibration_samples);

    println!("Calibrating PBKDF2 for a {}ms target...", target.as_millis());
    let iterations = tokio::task::spawn_blocking(move || {
        KdfIterationCalibrator::with_timer(samples, kdf.max_calibration_rounds, Pbkdf2Timer)
            .choose_iteration_count(target)
    })
    .await??;

    println!("calibrated iterations: {}", iterations);
    println!("effective iterations:  {}", iterations.max(kdf.min_iterations));
    Ok(())
}

fn settings(ctx: &CommandContext, save: bool) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&ctx.settings)?);

    if save {
        let path = ctx.data_directory.settings_file_path();
        ctx.settings.save(&path).context("Failed to save settings")?;
        println!("Saved to {}", path.display());
    }
    Ok(())
}
