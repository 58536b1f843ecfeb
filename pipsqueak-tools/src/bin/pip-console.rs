// pip-console
//
// Live table of every tag heard by the attached readers.

use chrono::Local;
use clap::Parser;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use pipsqueak::dash::{Dashboard, Flow};
use pipsqueak::data::{CsvLayout, IntervalEstimator, Recorder, SampleStore};
use pipsqueak::pip::port::DevicePool;
use pipsqueak_tools::input::{self, Control, FORCED_EXIT_CODE};
use pipsqueak_tools::term::{self, Term};
use pipsqueak_tools::{init_logging, Decoders, LogTarget, PipOpts, Settings, SettingsArgs};
use std::io;
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "pip-console", version, about = "Live dashboard for Pipsqueak sensor tags")]
struct Cli {
    #[command(flatten)]
    pip: PipOpts,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Replay captures as fast as possible instead of in real time
    #[arg(long)]
    fast: bool,
}

struct Console {
    dash: Dashboard<Term>,
    pool: DevicePool,
    decoders: Decoders,
    min_rssi: Option<f32>,
}

impl Console {
    fn pump_devices(&mut self, now: Instant) -> io::Result<bool> {
        self.pool.maybe_rescan(now);
        let (added, removed) = self.pool.take_changes();
        for name in added {
            self.dash.set_status(format!("Reader {} attached.", name))?;
        }
        for name in removed {
            self.dash.set_status(format!("Reader {} removed.", name))?;
        }

        let packets = self.pool.poll();
        let got_any = !packets.is_empty();
        for pkt in packets {
            match self.decoders.get(pkt.variant).decode(&pkt.data, pkt.received_at) {
                Ok(sample) => {
                    if self.min_rssi.is_some_and(|min| sample.rssi < min) {
                        log::trace!("tag {} below rssi floor: {}", sample.tag_id, sample.rssi);
                        continue;
                    }
                    self.dash.ingest(sample)?;
                }
                Err(e) => {
                    log::debug!("dropped packet: {}", e);
                    self.dash.decode_failed()?;
                }
            }
        }
        Ok(got_any)
    }

    fn control(&mut self, ctl: Control) -> io::Result<Flow> {
        match ctl {
            Control::Key(key) => self.dash.handle_key(key, Instant::now()),
            Control::Resize(cols, rows) => {
                self.dash.renderer_mut().set_size(cols, rows)?;
                self.dash.resize()?;
                Ok(Flow::Continue)
            }
        }
    }

    fn run(&mut self, controls: Receiver<Control>, settings: &Settings) -> io::Result<Flow> {
        let frame = settings.frame();
        let idle_sleep = settings.idle_sleep();
        let mut next_tick = Instant::now();
        loop {
            let now = Instant::now();
            let busy = self.pump_devices(now)?;

            loop {
                match controls.try_recv() {
                    Ok(ctl) => match self.control(ctl)? {
                        Flow::Continue => {}
                        flow => return Ok(flow),
                    },
                    Err(channel::TryRecvError::Empty) => break,
                    Err(channel::TryRecvError::Disconnected) => return Ok(Flow::Quit),
                }
            }

            if now >= next_tick {
                self.dash.tick(now)?;
                next_tick = now + frame;
            }

            if !busy {
                match controls.recv_timeout(idle_sleep) {
                    Ok(ctl) => match self.control(ctl)? {
                        Flow::Continue => {}
                        flow => return Ok(flow),
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return Ok(Flow::Quit),
                }
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.pip.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    settings.merge(&cli.settings);

    if let Err(e) = init_logging(LogTarget::File(settings.log_file.clone())) {
        eprintln!("Cannot open log file {}: {}", settings.log_file.display(), e);
        return ExitCode::FAILURE;
    }

    let pool = match cli.pip.open_pool(&settings, !cli.fast) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Cannot open packet source: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if pool.is_empty() {
        log::warn!("no readers attached yet");
    }

    term::install_panic_hook();
    let tui = match Term::setup() {
        Ok(t) => t,
        Err(e) => {
            term::restore();
            eprintln!("Cannot set up terminal: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = SampleStore::new(
        settings.history_capacity,
        IntervalEstimator::new(settings.default_interval_ms),
    );
    let layout = CsvLayout {
        hex_id: settings.csv_hex_column,
        moisture: settings.csv_moisture_column,
    };
    let recorder = Recorder::new(settings.record_dir.clone(), layout);
    let dash = Dashboard::new(tui, store, recorder, Instant::now())
        .with_idle_timeout(settings.idle_timeout())
        .with_id_format(settings.id_format.into());

    let mut console = Console {
        dash,
        pool,
        decoders: Decoders::new(settings.binary_temp_offset),
        min_rssi: settings.min_rssi,
    };

    let (ctl_tx, ctl_rx) = channel::unbounded();
    input::spawn(ctl_tx);

    log::info!("pip-console started at {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    let result = console.dash.redraw().and_then(|_| console.run(ctl_rx, &settings));
    drop(console);

    match result {
        Ok(Flow::ForceQuit) => {
            log::warn!("forced exit");
            std::process::exit(FORCED_EXIT_CODE);
        }
        Ok(_) => {
            log::info!("pip-console stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("terminal error: {}", e);
            eprintln!("Terminal error: {}", e);
            ExitCode::FAILURE
        }
    }
}
