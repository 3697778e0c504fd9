//! Prompting on the controlling terminal.
//!
//! Secrets are read with echo switched off. Ctrl-C while prompting restores
//! the terminal settings saved at startup and exits with status 0; nothing
//! has been mounted or written at that point.

use std::io::{self, BufRead, Write};
use std::sync::OnceLock;

use tracing::debug;

use super::{Answer, Prompter};
use crate::error::{ProvisionError, Result};

/// Terminal settings to restore from the signal handler.
static SAVED_TERMIOS: OnceLock<libc::termios> = OnceLock::new();

fn get_termios() -> Option<libc::termios> {
    // SAFETY: termios is plain data; tcgetattr fills it or fails.
    unsafe {
        let mut term: libc::termios = std::mem::zeroed();
        (libc::tcgetattr(libc::STDIN_FILENO, &mut term) == 0).then_some(term)
    }
}

fn set_termios(term: &libc::termios) {
    // SAFETY: term came from tcgetattr on the same descriptor.
    unsafe {
        libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, term);
    }
}

extern "C" fn on_interrupt(_signal: libc::c_int) {
    const MESSAGE: &[u8] = b"\nExiting.\n";
    if let Some(term) = SAVED_TERMIOS.get() {
        set_termios(term);
    }
    // SAFETY: write and _exit are async-signal-safe.
    unsafe {
        libc::write(libc::STDOUT_FILENO, MESSAGE.as_ptr().cast(), MESSAGE.len());
        libc::_exit(0);
    }
}

/// Make Ctrl-C during prompting a clean exit.
pub fn install_interrupt_handler() {
    if let Some(term) = get_termios() {
        let _ = SAVED_TERMIOS.set(term);
    }
    let handler = on_interrupt as extern "C" fn(libc::c_int);
    // SAFETY: the handler only calls async-signal-safe functions.
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

/// Ignore Ctrl-C while the target is mounted and being written, so the
/// mount session always gets to release.
pub fn ignore_interrupts() {
    // SAFETY: SIG_IGN is a valid disposition for SIGINT.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_IGN);
    }
    debug!("interrupts ignored until exit");
}

/// Echo off until dropped.
struct EchoGuard {
    original: libc::termios,
}

impl EchoGuard {
    fn disable() -> Option<Self> {
        let original = get_termios()?;
        let mut silent = original;
        silent.c_lflag &= !libc::ECHO;
        set_termios(&silent);
        Some(Self { original })
    }
}

impl Drop for EchoGuard {
    fn drop(&mut self) {
        set_termios(&self.original);
    }
}

#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
    pub fn new() -> Self {
        install_interrupt_handler();
        Self
    }

    fn read_line(&mut self, prompt: &str) -> Result<String> {
        let mut stdout = io::stdout();
        write!(stdout, "{}", prompt).map_err(|e| ProvisionError::io("<stdout>", e))?;
        stdout.flush().map_err(|e| ProvisionError::io("<stdout>", e))?;

        let mut line = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| ProvisionError::io("<stdin>", e))?;
        if read == 0 {
            return Err(ProvisionError::Interrupted);
        }
        Ok(line)
    }
}

impl Prompter for TerminalPrompter {
    fn ask(&mut self, prompt: &str) -> Result<Answer> {
        Ok(Answer::from_input(&self.read_line(prompt)?))
    }

    fn ask_secret(&mut self, prompt: &str) -> Result<Answer> {
        let line = {
            let _echo = EchoGuard::disable();
            self.read_line(prompt)
        };
        // The newline typed by the operator was not echoed.
        println!();
        Ok(Answer::from_input(&line?))
    }

    fn say(&mut self, message: &str) {
        println!("{}", message);
    }
}
