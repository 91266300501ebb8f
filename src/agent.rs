//! Agent - Entry points when loaded into the target process
//!
//! With `THAW_OUTPUT` set, the constructor runs one session on a background
//! thread and writes the stream there. External drivers can instead call
//! `thaw_prepare` and `thaw_dump` directly.

use std::ffi::CStr;
use std::fs::File;
use std::io::BufWriter;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;

use crate::config::AgentConfig;
use crate::core::error::{EXIT_CHANNEL, EXIT_OK, EXIT_ORACLE_NOT_BOUND};
use crate::engine::Dumper;
use crate::host::{PlatformHost, StdFileSystem};
use crate::oracle::{LoadCommandOracle, NativeOracle};
use crate::transfer::StreamChannel;

type AgentDumper = Dumper<PlatformHost, StdFileSystem>;

static SESSION: Lazy<Mutex<AgentDumper>> =
    Lazy::new(|| Mutex::new(Dumper::new(PlatformHost::new(), StdFileSystem)));

fn session() -> MutexGuard<'static, AgentDumper> {
    SESSION.lock().unwrap_or_else(|e| e.into_inner())
}

/// Bind the library at `oracle`, or the built-in oracle when `None`
fn bind_oracle(dumper: &mut AgentDumper, oracle: Option<&Path>) -> i32 {
    match oracle {
        Some(path) => match NativeOracle::load(path) {
            Ok(native) => dumper.prepare(native),
            Err(e) => {
                log::error!("{}", e);
                return EXIT_ORACLE_NOT_BOUND;
            }
        },
        None => {
            let memory = dumper.host().memory();
            dumper.prepare(LoadCommandOracle::new(memory));
            log::info!("Using built-in load command oracle");
        }
    }
    EXIT_OK
}

/// Run one session into the stream at `output`
fn run(config: &AgentConfig, output: &Path) -> i32 {
    let dumper = session();
    let file = match File::create(output) {
        Ok(file) => file,
        Err(e) => {
            log::error!("Failed to create {}: {}", output.display(), e);
            return EXIT_CHANNEL;
        }
    };
    let mut channel = StreamChannel::new(BufWriter::new(file));

    let code = match dumper.dump(&config.options, &mut channel) {
        Ok(report) => {
            for error in &report.errors {
                log::warn!("{}", error);
            }
            report.exit_code()
        }
        Err(e) => {
            log::error!("{}", e);
            e.exit_code()
        }
    };

    if let Err(e) = channel.finish(code) {
        log::error!("Failed to finish {}: {}", output.display(), e);
    }
    code
}

/// Environment configuration, or the completion code for a bad setting
fn load_config() -> Result<AgentConfig, i32> {
    AgentConfig::from_env().map_err(|e| {
        log::error!("{}", e);
        e.exit_code()
    })
}

// Constructor - runs when library is loaded
#[ctor::ctor]
fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let Ok(config) = load_config() else { return };
    let Some(output) = config.output.clone() else { return };

    log::info!("thaw agent loaded in pid {}", std::process::id());
    std::thread::spawn(move || {
        let mut code = bind_oracle(&mut session(), config.oracle.as_deref());
        if code == EXIT_OK {
            code = run(&config, &output);
        }
        log::info!("Dump finished with code {}", code);
    });
}

/// Bind the oracle from the library at `path`; a null `path` selects the
/// built-in oracle. Returns 0 on success.
///
/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn thaw_prepare(path: *const c_char) -> i32 {
    let oracle = if path.is_null() {
        None
    } else {
        Some(PathBuf::from(CStr::from_ptr(path).to_string_lossy().into_owned()))
    };
    bind_oracle(&mut session(), oracle.as_deref())
}

/// Run a session into `THAW_OUTPUT` and return its completion code.
/// `thaw_prepare` must have been called first.
#[no_mangle]
pub extern "C" fn thaw_dump(executable_only: bool) -> i32 {
    let mut config = match load_config() {
        Ok(config) => config,
        Err(code) => return code,
    };
    let Some(output) = config.output.clone() else {
        log::error!("THAW_OUTPUT is not set");
        return EXIT_CHANNEL;
    };
    config.options.executable_only |= executable_only;
    run(&config, &output)
}
