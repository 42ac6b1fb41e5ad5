mod app;

use anyhow::{Context, Result};
use app::render::Screen;
use app::{AppEvent, AppRuntime, AppState, SettingsEvent};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    style::ResetColor,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use matrix_rain::debug_hooks;
use matrix_rain::feed::{FeedController, FeedEvent};
use matrix_rain::persist::Persistence;
use matrix_rain::rain::RainField;
use matrix_rain::tokens::TokenStreams;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const FRAME_INTERVAL: Duration = Duration::from_micros(33_333);
const SETTINGS_CHECK: Duration = Duration::from_secs(1);

struct Host {
    persistence: Persistence,
    controller: FeedController,
    streams: TokenStreams,
    events: mpsc::Receiver<FeedEvent>,
    shutdown: Arc<AtomicBool>,
    runtime: AppRuntime,
}

fn main() -> Result<()> {
    debug_hooks::init();

    let persistence = Persistence::new()?;
    let settings = persistence.load();
    debug_hooks::log_settings(
        "using",
        format!("{:?} mode={}", persistence.config_path(), settings.mode.as_str()),
    );

    let tokio_rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("matrix-feed")
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .context("install Ctrl-C handler")?;
    }

    let streams = TokenStreams::default();
    let (tx, rx) = mpsc::channel();
    let mut controller = FeedController::new(tokio_rt.handle().clone(), streams.clone(), tx);
    controller.start_from_settings(&settings);

    let mut host = Host {
        persistence,
        controller,
        streams,
        events: rx,
        shutdown,
        runtime: AppRuntime::new(AppState::new(settings)),
    };

    terminal::enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let res = host.frame_loop(&mut stdout);

    let _ = execute!(stdout, ResetColor, cursor::Show, LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();

    host.controller.stop();
    tokio_rt.shutdown_timeout(Duration::from_millis(500));
    log::logger().flush();
    res
}

fn seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

impl Host {
    fn frame_loop<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let (mut width, mut height) = terminal::size().context("query terminal size")?;
        let settings = &self.runtime.state.settings;
        let mut field = RainField::new(
            width,
            height.saturating_sub(1),
            settings.charset,
            settings.trail,
            seed(),
        );
        let mut screen = Screen::new();
        screen.invalidate(out)?;

        let mut next_frame = Instant::now();
        let mut last_settings_check = Instant::now();

        while !self.shutdown.load(Ordering::SeqCst) {
            while event::poll(Duration::ZERO)? {
                match event::read()? {
                    Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        // raw mode swallows SIGINT
                        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                            return Ok(())
                        }
                        KeyCode::Char('p') | KeyCode::Char(' ') => self.toggle_pause(),
                        _ => {}
                    },
                    Event::Resize(w, h) => {
                        width = w;
                        height = h;
                        field.resize(width, height.saturating_sub(1));
                        screen.invalidate(out)?;
                        self.runtime.mark_dirty();
                    }
                    _ => {}
                }
            }

            for ev in self.events.try_iter() {
                self.runtime.handle_event(AppEvent::Feed(ev));
            }

            if last_settings_check.elapsed() >= SETTINGS_CHECK {
                last_settings_check = Instant::now();
                if self.persistence.changed_on_disk() {
                    let settings = self.persistence.load();
                    self.runtime
                        .handle_event(AppEvent::Settings(SettingsEvent::Reloaded { settings }));
                }
            }

            let state = &mut self.runtime.state;
            if state.restart_requested {
                state.restart_requested = false;
                self.controller.start_from_settings(&state.settings);
            }
            if state.field_dirty {
                state.field_dirty = false;
                field.set_charset(state.settings.charset);
                field.set_trail(state.settings.trail);
            }

            self.runtime.tick_if_needed(self.streams.depth());

            if !self.runtime.state.paused {
                let frame = field.step(&self.streams);
                screen.draw(out, &frame)?;
            }
            if self.runtime.take_dirty() && height > 0 {
                screen.draw_status(out, &self.runtime.state, height - 1, width)?;
            }
            out.flush()?;

            next_frame += FRAME_INTERVAL;
            let now = Instant::now();
            if next_frame > now {
                std::thread::sleep(next_frame - now);
            } else {
                next_frame = now;
            }
        }
        Ok(())
    }

    /// Pause is a persisted setting; the feed keeps filling the buffers.
    fn toggle_pause(&mut self) {
        let mut settings = self.runtime.state.settings.clone();
        settings.paused = !settings.paused;
        if let Err(err) = self.persistence.save_now(&settings) {
            debug_hooks::log_settings_issue(format!("save failed: {err:#}"));
        }
        self.runtime
            .handle_event(AppEvent::Settings(SettingsEvent::Reloaded { settings }));
    }
}
