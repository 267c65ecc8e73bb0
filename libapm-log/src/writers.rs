// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::MakeWriter;

/// A non-blocking writer appending log output to a file.
///
/// Writes are handed to a background thread owned by `_guard`; dropping the writer flushes
/// pending lines and stops that thread.
pub(crate) struct FileWriter {
    non_blocking: NonBlocking,
    _guard: WorkerGuard,
}

impl FileWriter {
    /// Opens `path` in append mode, creating missing parent directories.
    pub(crate) fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);

        Ok(Self {
            non_blocking,
            _guard: guard,
        })
    }
}

impl<'a> MakeWriter<'a> for FileWriter {
    type Writer = NonBlocking;

    fn make_writer(&'a self) -> Self::Writer {
        self.non_blocking.clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum StdTarget {
    Out,
    Err,
}

pub(crate) struct StdWriter {
    target: StdTarget,
}

impl StdWriter {
    pub(crate) fn new(target: StdTarget) -> Self {
        Self { target }
    }
}

impl Write for StdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.target {
            StdTarget::Out => io::stdout().write(buf),
            StdTarget::Err => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.target {
            StdTarget::Out => io::stdout().flush(),
            StdTarget::Err => io::stderr().flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for StdWriter {
    type Writer = StdWriter;

    fn make_writer(&'a self) -> Self::Writer {
        StdWriter::new(self.target)
    }
}
