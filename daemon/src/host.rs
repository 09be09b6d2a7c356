use std::{
    io::{ErrorKind, Write},
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Local, Offset, Utc};
use chrono_tz::Tz;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use calblink_common::{
    BlinkerError, BlinkerState, ConfigError, Light, Progress, RenderOutcome, Scheduler,
    SchedulerState, TickPlan, UserPrefs,
};

use crate::{
    calendar::{CalendarSource, JsonFileCalendar},
    cli::{self, CliArgs, Command},
    light::TraceLight,
};

pub type SharedBlinker<L> = Arc<Mutex<BlinkerState<L>>>;

#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub tick: Duration,
    pub render: Duration,
    pub show_dots: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            render: Duration::from_millis(100),
            show_dots: true,
        }
    }
}

/// Wall clock the scheduler reads. A configured IANA zone wins over the
/// system offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Clock {
    Local,
    Zone(Tz),
}

impl Clock {
    pub fn from_prefs(prefs: &UserPrefs) -> Result<Self, ConfigError> {
        match prefs.timezone.as_deref() {
            None => Ok(Self::Local),
            Some(name) => name
                .parse::<Tz>()
                .map(Self::Zone)
                .map_err(|_| ConfigError::InvalidTimezone(name.to_string())),
        }
    }

    pub fn now(self) -> DateTime<FixedOffset> {
        match self {
            Self::Local => Local::now().fixed_offset(),
            Self::Zone(tz) => {
                let local = Utc::now().with_timezone(&tz);
                local.with_timezone(&local.offset().fix())
            }
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    let cli = match cli::parse(std::env::args().skip(1))? {
        Command::Help => {
            print!("{}", cli::USAGE);
            return Ok(());
        }
        Command::Run(cli) => cli,
    };

    init_tracing(cli.debug);

    let prefs = load_prefs(&cli).await?;
    let clock = Clock::from_prefs(&prefs)?;
    let calendar = JsonFileCalendar::connect(&cli.events)
        .await
        .context("unable to retrieve calendar client")?;

    info!(
        config = %cli.config.display(),
        events = %calendar.path().display(),
        calendars = ?prefs.calendars,
        poll_interval = prefs.poll_interval,
        response_state = prefs.response_state.as_str(),
        priority_flash_side = prefs.priority_flash_side.as_str(),
        "calblink starting"
    );

    let blinker = Arc::new(Mutex::new(BlinkerState::new(
        TraceLight::new(),
        prefs.device_failure_retries,
    )));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(blinker.clone(), shutdown_tx);

    let options = LoopOptions {
        show_dots: prefs.show_dots && !cli.run_as_service,
        ..LoopOptions::default()
    };
    serve(blinker, calendar, prefs, clock, options, shutdown_rx).await?;

    info!("calblink stopped");
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
    };
    // stdout carries the progress dots
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn load_prefs(cli: &CliArgs) -> anyhow::Result<UserPrefs> {
    let mut prefs = match tokio::fs::read(&cli.config).await {
        Ok(raw) => UserPrefs::from_json(&raw)
            .with_context(|| format!("invalid preferences in {}", cli.config.display()))?,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %cli.config.display(), "no preferences file, using defaults");
            UserPrefs::default()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("unable to read {}", cli.config.display()))
        }
    };
    prefs.apply_overrides(&cli.overrides);
    prefs.sanitize();
    Ok(prefs)
}

/// Runs the pattern runner and the scheduler until shutdown is signaled or
/// the light gives up. The light is closed when this returns, and dark
/// unless an error is returned.
pub async fn serve<L, C>(
    blinker: SharedBlinker<L>,
    calendar: C,
    prefs: UserPrefs,
    clock: Clock,
    options: LoopOptions,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    L: Light + 'static,
    C: CalendarSource,
{
    let mut runner = spawn_pattern_runner(blinker.clone(), options.render, shutdown.clone());
    let scheduler = run_scheduler(&blinker, &calendar, &prefs, clock, options, shutdown);
    tokio::pin!(scheduler);

    let result: anyhow::Result<()> = tokio::select! {
        stopped = &mut scheduler => match stopped {
            Ok(()) => runner
                .await
                .context("pattern runner panicked")
                .and_then(|rendered| rendered.context("light failed")),
            Err(err) => Err(err).context("unable to turn the light off"),
        },
        joined = &mut runner => match joined.context("pattern runner panicked") {
            Ok(Ok(())) => scheduler.await.context("unable to turn the light off"),
            Ok(Err(err)) => Err(err).context("light failed"),
            Err(err) => Err(err),
        },
    };

    let mut state = blinker.lock().await;
    debug!(remaining_retries = state.remaining_retries(), "closing light");
    state.close();
    result
}

/// Turns the light off, then tells every task to stop. The tasks are told
/// to stop even when the light could not be turned off.
pub async fn shut_down<L: Light>(
    blinker: &SharedBlinker<L>,
    shutdown: &watch::Sender<bool>,
) -> Result<(), BlinkerError> {
    let dark = go_dark(blinker).await;
    shutdown.send_replace(true);
    dark
}

fn spawn_signal_handler<L: Light + 'static>(
    blinker: SharedBlinker<L>,
    shutdown: watch::Sender<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(signal) => info!("received {signal}, turning the light off"),
            Err(err) => {
                warn!("unable to listen for shutdown signals: {err:#}");
                return;
            }
        }
        if let Err(err) = shut_down(&blinker, &shutdown).await {
            warn!("unable to turn the light off: {err}");
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> anyhow::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to wait for ctrl-c")?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> anyhow::Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for ctrl-c")?;
    Ok("ctrl-c")
}

fn spawn_pattern_runner<L: Light + 'static>(
    blinker: SharedBlinker<L>,
    period: Duration,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<(), BlinkerError>> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if *shutdown.borrow() {
                debug!("pattern runner stopped");
                return Ok(());
            }

            let outcome = blinker.lock().await.render_once(monotonic_ms())?;
            match outcome {
                RenderOutcome::Failed { error, remaining } => {
                    warn!(remaining, "light write failed, reopening: {error}");
                }
                RenderOutcome::Written(color) => debug!(%color, "light updated"),
                RenderOutcome::Unchanged => {}
            }
        }
    })
}

async fn run_scheduler<L, C>(
    blinker: &SharedBlinker<L>,
    calendar: &C,
    prefs: &UserPrefs,
    clock: Clock,
    options: LoopOptions,
    shutdown: watch::Receiver<bool>,
) -> Result<(), BlinkerError>
where
    L: Light,
    C: CalendarSource,
{
    let mut scheduler = Scheduler::new();
    let mut interval = tokio::time::interval(options.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        if *shutdown.borrow() {
            scheduler.request_exit();
        }

        let now = clock.now();
        match scheduler.tick(now, prefs) {
            TickPlan::Exit => {
                go_dark(blinker).await?;
                debug!("scheduler stopped");
                return Ok(());
            }
            TickPlan::Wait => {}
            TickPlan::Suppress(hit) => {
                if blinker.lock().await.turn_off() {
                    info!(
                        reason = hit.reason.as_str(),
                        resume_at = %hit.resume_at,
                        "light suppressed"
                    );
                }
                show_progress(options, Progress::Suppressed(hit.reason));
            }
            TickPlan::Fetch => {
                let fetched = calendar.fetch_events(now, prefs).await;
                if let Err(err) = &fetched {
                    warn!(failures = scheduler.failures() + 1, "calendar fetch failed: {err}");
                }
                let outcome = scheduler.record_fetch(now, fetched.as_deref(), prefs);
                debug!(
                    state = scheduler.state().as_str(),
                    failures = scheduler.failures(),
                    "calendar checked"
                );

                // the next tick turns the light off
                if *shutdown.borrow() {
                    continue;
                }

                if let Some(pattern) = outcome.pattern {
                    if scheduler.state() == SchedulerState::Degraded {
                        warn!(
                            failures = scheduler.failures(),
                            "calendar unreachable, showing error pattern"
                        );
                    }
                    let mut state = blinker.lock().await;
                    if state.pattern() != &pattern {
                        info!(?pattern, "pattern changed");
                    }
                    pattern.execute(&mut *state);
                }
                show_progress(options, outcome.progress);
            }
        }
    }
}

async fn go_dark<L: Light>(blinker: &SharedBlinker<L>) -> Result<(), BlinkerError> {
    let outcome = blinker.lock().await.turn_off_now(monotonic_ms())?;
    debug!(?outcome, "light turned off");
    Ok(())
}

fn show_progress(options: LoopOptions, progress: Progress) {
    if !options.show_dots {
        return;
    }
    let mut stdout = std::io::stdout().lock();
    let _ = write!(stdout, "{}", progress.symbol());
    let _ = stdout.flush();
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::{
        path::PathBuf,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use calblink_common::{
        CalendarEvent, Color, DayOfWeek, DeviceError, FetchError, PrefsOverrides, ResponseStatus,
    };

    use super::*;

    const FAST: LoopOptions = LoopOptions {
        tick: Duration::from_millis(10),
        render: Duration::from_millis(5),
        show_dots: false,
    };

    #[derive(Debug, Default)]
    struct FakeLight {
        open: bool,
        broken: bool,
        /// Black writes that fail once something else has been shown.
        stuck_lit: u32,
        writes: Vec<Color>,
    }

    impl Light for FakeLight {
        fn open(&mut self) -> Result<(), DeviceError> {
            self.open = true;
            Ok(())
        }

        fn set_color(&mut self, color: Color) -> Result<(), DeviceError> {
            if self.broken {
                return Err(DeviceError("unplugged".to_string()));
            }
            let lit = self.writes.iter().any(|shown| !shown.is_off());
            if color.is_off() && lit && self.stuck_lit > 0 {
                self.stuck_lit -= 1;
                return Err(DeviceError("write timed out".to_string()));
            }
            self.writes.push(color);
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }
    }

    #[derive(Default)]
    struct FakeCalendar {
        events: Vec<CalendarEvent>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CalendarSource for FakeCalendar {
        async fn fetch_events(
            &self,
            _now: DateTime<FixedOffset>,
            _prefs: &UserPrefs,
        ) -> Result<Vec<CalendarEvent>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.events.clone())
        }
    }

    fn shared(light: FakeLight, retries: u32) -> SharedBlinker<FakeLight> {
        Arc::new(Mutex::new(BlinkerState::new(light, retries)))
    }

    fn meeting_in_progress() -> CalendarEvent {
        let now = Local::now().fixed_offset();
        CalendarEvent {
            id: "review".to_string(),
            summary: "Design review".to_string(),
            calendar: "primary".to_string(),
            start: now - chrono::Duration::minutes(1),
            end: now + chrono::Duration::minutes(30),
            response: ResponseStatus::Accepted,
        }
    }

    async fn wait_for_color(blinker: &SharedBlinker<FakeLight>, color: Color) -> bool {
        for _ in 0..300 {
            if blinker.lock().await.shown() == Some(color) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn busy_event_lights_red_and_shutdown_leaves_it_dark() {
        let blinker = shared(FakeLight::default(), 10);
        let (tx, rx) = watch::channel(false);
        let calendar = FakeCalendar {
            events: vec![meeting_in_progress()],
            ..FakeCalendar::default()
        };

        let driver = async {
            let lit = wait_for_color(&blinker, Color::RED).await;
            shut_down(&blinker, &tx).await.unwrap();
            lit
        };
        let (served, lit) = tokio::join!(
            serve(
                blinker.clone(),
                calendar,
                UserPrefs::default(),
                Clock::Local,
                FAST,
                rx
            ),
            driver
        );

        served.unwrap();
        assert!(lit);
        let blinker = blinker.lock().await;
        assert!(blinker.light().writes.contains(&Color::RED));
        assert_eq!(blinker.light().writes.last(), Some(&Color::BLACK));
        assert!(!blinker.light().open);
    }

    #[tokio::test]
    async fn shutdown_retries_failed_turn_off() {
        let light = FakeLight {
            stuck_lit: 2,
            ..FakeLight::default()
        };
        let blinker = shared(light, 10);
        let (tx, rx) = watch::channel(false);
        let calendar = FakeCalendar {
            events: vec![meeting_in_progress()],
            ..FakeCalendar::default()
        };

        let driver = async {
            let lit = wait_for_color(&blinker, Color::RED).await;
            let dark = shut_down(&blinker, &tx).await;
            (lit, dark)
        };
        let (served, (lit, dark)) = tokio::join!(
            serve(
                blinker.clone(),
                calendar,
                UserPrefs::default(),
                Clock::Local,
                FAST,
                rx
            ),
            driver
        );

        served.unwrap();
        assert!(lit);
        dark.unwrap();
        let blinker = blinker.lock().await;
        assert_eq!(blinker.light().writes.last(), Some(&Color::BLACK));
        assert_eq!(blinker.light().stuck_lit, 0);
        assert_eq!(blinker.remaining_retries(), 10);
    }

    #[tokio::test]
    async fn light_stuck_on_at_shutdown_is_fatal() {
        let light = FakeLight {
            stuck_lit: u32::MAX,
            ..FakeLight::default()
        };
        let blinker = shared(light, 3);
        let (tx, rx) = watch::channel(false);
        let calendar = FakeCalendar {
            events: vec![meeting_in_progress()],
            ..FakeCalendar::default()
        };

        let driver = async {
            let lit = wait_for_color(&blinker, Color::RED).await;
            let dark = shut_down(&blinker, &tx).await;
            (lit, dark)
        };
        let (served, (lit, dark)) = tokio::join!(
            serve(
                blinker.clone(),
                calendar,
                UserPrefs::default(),
                Clock::Local,
                FAST,
                rx
            ),
            driver
        );

        assert!(lit);
        assert!(matches!(
            dark,
            Err(BlinkerError::RetriesExhausted { retries: 3, .. })
        ));
        assert!(served.is_err());
        assert_eq!(blinker.lock().await.light().writes.last(), Some(&Color::RED));
    }

    #[tokio::test]
    async fn skip_day_suppresses_without_fetching() {
        let blinker = shared(FakeLight::default(), 10);
        let (tx, rx) = watch::channel(false);
        let calls = Arc::new(AtomicUsize::new(0));
        let calendar = FakeCalendar {
            events: vec![meeting_in_progress()],
            calls: calls.clone(),
        };
        let mut prefs = UserPrefs::default();
        for day in DayOfWeek::ALL {
            prefs.skip_days.insert(day);
        }

        let driver = async {
            let dark = wait_for_color(&blinker, Color::BLACK).await;
            tokio::time::sleep(Duration::from_millis(50)).await;
            shut_down(&blinker, &tx).await.unwrap();
            dark
        };
        let (served, dark) = tokio::join!(
            serve(blinker.clone(), calendar, prefs, Clock::Local, FAST, rx),
            driver
        );

        served.unwrap();
        assert!(dark);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!blinker.lock().await.light().writes.contains(&Color::RED));
    }

    #[tokio::test]
    async fn exhausted_device_budget_is_fatal() {
        let light = FakeLight {
            broken: true,
            ..FakeLight::default()
        };
        let blinker = shared(light, 2);
        let (_tx, rx) = watch::channel(false);

        let served = tokio::time::timeout(
            Duration::from_secs(5),
            serve(
                blinker.clone(),
                FakeCalendar::default(),
                UserPrefs::default(),
                Clock::Local,
                FAST,
                rx,
            ),
        )
        .await
        .expect("serve should stop on its own");

        let err = served.unwrap_err();
        assert!(format!("{err:#}").contains("device failed 2 consecutive times"));
        assert!(!blinker.lock().await.light().open);
    }

    #[tokio::test]
    async fn shutdown_before_start_returns_promptly() {
        let blinker = shared(FakeLight::default(), 10);
        let (tx, rx) = watch::channel(false);
        shut_down(&blinker, &tx).await.unwrap();

        serve(
            blinker.clone(),
            FakeCalendar::default(),
            UserPrefs::default(),
            Clock::Local,
            FAST,
            rx,
        )
        .await
        .unwrap();

        assert_eq!(blinker.lock().await.light().writes, vec![Color::BLACK]);
    }

    #[tokio::test]
    async fn missing_preferences_file_means_defaults_plus_overrides() {
        let cli = CliArgs {
            config: PathBuf::from("/nonexistent/calblink/conf.json"),
            overrides: PrefsOverrides {
                poll_interval: Some(5),
                ..PrefsOverrides::default()
            },
            ..CliArgs::default()
        };

        let prefs = load_prefs(&cli).await.unwrap();

        assert_eq!(prefs.poll_interval, 5);
        assert_eq!(prefs.calendars, UserPrefs::default().calendars);
    }

    #[test]
    fn clock_rejects_unknown_timezone() {
        let prefs = UserPrefs {
            timezone: Some("Mars/Olympus".to_string()),
            ..UserPrefs::default()
        };
        assert!(matches!(
            Clock::from_prefs(&prefs),
            Err(ConfigError::InvalidTimezone(_))
        ));

        let prefs = UserPrefs {
            timezone: Some("Europe/Berlin".to_string()),
            ..UserPrefs::default()
        };
        assert_eq!(
            Clock::from_prefs(&prefs).unwrap(),
            Clock::Zone(chrono_tz::Europe::Berlin)
        );
    }
}
