/*
 * Copyright (c) Microsoft Corporation.
 * Licensed under the MIT license.
 */

use std::io::Write;

use indicatif::ProgressDrawTarget;

/// Where the dataset driver sends its human-readable report and its progress bars.
///
/// Binaries use [`DefaultOutput`]; tests use [`Memory`] to inspect the report without
/// drawing anything.
pub trait Output {
    fn sink(&mut self) -> &mut dyn Write;
    fn draw_target(&self) -> ProgressDrawTarget;
}

/// Lets `&mut dyn Output` be the receiver of `write!`/`writeln!`.
impl Write for &mut dyn Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.sink().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.sink().flush()
    }
}

/// Report to `stdout`, progress bars to `stderr`.
#[derive(Debug)]
pub struct DefaultOutput(std::io::Stdout);

impl DefaultOutput {
    pub fn new() -> Self {
        Self(std::io::stdout())
    }
}

impl Default for DefaultOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Output for DefaultOutput {
    fn sink(&mut self) -> &mut dyn Write {
        &mut self.0
    }

    fn draw_target(&self) -> ProgressDrawTarget {
        ProgressDrawTarget::stderr()
    }
}

/// Captures the report in a buffer. Progress bars are hidden.
#[derive(Debug, Default)]
pub struct Memory(Vec<u8>);

impl Memory {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    /// The captured report, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl Output for Memory {
    fn sink(&mut self) -> &mut dyn Write {
        &mut self.0
    }

    fn draw_target(&self) -> ProgressDrawTarget {
        ProgressDrawTarget::hidden()
    }
}
