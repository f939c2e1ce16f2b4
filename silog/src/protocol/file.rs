// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Binary log-file protocol.
//!
//! Writes framed packets into `SILF` files, optionally wrapped in
//! AES-128-CBC (`SILE` files carrying a 16-byte IV after the magic).
//! Files rotate by calendar interval and/or size, and a rotation set can
//! be pruned down to a maximum number of parts.

use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use aes::Aes128;
use cbc::cipher::{Block, BlockEncryptMut, KeyIvInit};
use chrono::{DateTime, NaiveDateTime, Utc};
use silog_common::LookupTable;
use tracing::debug;

use crate::connections::ConnectionsBuilder;
use crate::error::SilogError;
use crate::formatter::{BinaryFormatter, Formatter, BINARY_MAGIC, ENCRYPTED_MAGIC};
use crate::packet::Packet;
use crate::protocol::ProtocolImpl;
use crate::rotater::{FileRotater, RotateMode};
use crate::Result;

const DEFAULT_FILENAME: &str = "log.sil";
const KEY_SIZE: usize = 16;
const INTERNAL_BUFFER: usize = 8 * 1024;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S";

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// Shared options of the file-backed protocols.
#[derive(Debug, Clone)]
pub(crate) struct FileOptions {
    pub filename: PathBuf,
    pub append: bool,
    /// Flush cadence in bytes; zero flushes after every packet.
    pub buffer: usize,
    pub rotate: RotateMode,
    pub max_size: u64,
    pub max_parts: u32,
}

impl FileOptions {
    pub fn load(table: &LookupTable, default_filename: &str) -> FileOptions {
        let rotate = RotateMode::from_name(&table.get_string("rotate", "none"))
            .unwrap_or_default();
        let max_size = table.get_size("maxsize", 0).max(0) as u64;
        // Pure size-based rotation historically kept two parts unless
        // told otherwise.
        let default_parts = if max_size > 0 && rotate == RotateMode::None {
            2
        } else {
            0
        };
        FileOptions {
            filename: PathBuf::from(table.get_string("filename", default_filename)),
            append: table.get_bool("append", false),
            buffer: table.get_size("buffer", 0).max(0) as usize,
            rotate,
            max_size,
            max_parts: table.get_int("maxparts", default_parts).max(0) as u32,
        }
    }

    pub fn build(&self, builder: &mut ConnectionsBuilder) {
        builder.add_option("filename", self.filename.display());
        builder.add_option("append", self.append);
        if self.rotate != RotateMode::None {
            builder.add_option("rotate", format!("{:?}", self.rotate).to_lowercase());
        }
        if self.max_size > 0 {
            builder.add_option("maxsize", format!("{}KB", self.max_size / 1024));
        }
        if self.max_parts > 0 {
            builder.add_option("maxparts", self.max_parts);
        }
    }

    pub fn is_rotating(&self) -> bool {
        self.rotate != RotateMode::None || self.max_size > 0
    }
}

/// How the on-disk stream opens: framed binary, optionally encrypted, or
/// plain text behind a byte-order mark.
pub(crate) enum HeaderKind {
    Binary { encrypt: bool, key: Vec<u8> },
    Text,
}

enum FileSink {
    Plain(BufWriter<File>),
    Encrypted(CipherWriter<BufWriter<File>>),
}

impl FileSink {
    fn finish(self) -> io::Result<()> {
        match self {
            FileSink::Plain(mut inner) => inner.flush(),
            FileSink::Encrypted(inner) => inner.finish().map(drop),
        }
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileSink::Plain(inner) => inner.write(buf),
            FileSink::Encrypted(inner) => inner.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileSink::Plain(inner) => inner.flush(),
            FileSink::Encrypted(inner) => inner.flush(),
        }
    }
}

struct OpenFile {
    sink: FileSink,
    path: PathBuf,
    written: u64,
    unflushed: usize,
}

/// Open/rotate/prune machinery shared by the binary and text file
/// protocols.
pub(crate) struct FileEngine {
    options: FileOptions,
    header: HeaderKind,
    rotater: FileRotater,
    state: Option<OpenFile>,
}

impl FileEngine {
    pub fn new(options: FileOptions, header: HeaderKind) -> FileEngine {
        let rotate = options.rotate;
        FileEngine {
            options,
            header,
            rotater: FileRotater::new(rotate),
            state: None,
        }
    }

    pub fn options(&self) -> &FileOptions {
        &self.options
    }

    pub fn connect(&mut self) -> Result<()> {
        self.open_file(self.options.append)
    }

    pub fn disconnect(&mut self) -> Result<()> {
        if let Some(state) = self.state.take() {
            state.sink.finish()?;
        }
        Ok(())
    }

    pub fn write_packet(
        &mut self,
        formatter: &mut dyn Formatter,
        packet: &Packet,
    ) -> Result<()> {
        let size = formatter.compile(packet) as u64;
        if size == 0 {
            return Ok(());
        }
        if self.options.rotate != RotateMode::None && self.rotater.update(Utc::now()) {
            self.reopen()?;
        }
        if self.options.max_size > 0 {
            // A packet that can never fit must not trigger a rotation
            // loop; it is dropped instead.
            if size > self.options.max_size {
                return Ok(());
            }
            let written = self.state.as_ref().map(|s| s.written).unwrap_or(0);
            if written + size > self.options.max_size {
                self.reopen()?;
            }
        }
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "log file is not open"))?;
        formatter.write(&mut state.sink)?;
        state.written += size;
        if self.options.buffer == 0 {
            state.sink.flush()?;
        } else {
            state.unflushed += size as usize;
            if state.unflushed >= self.options.buffer {
                state.sink.flush()?;
                state.unflushed = 0;
            }
        }
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        if let Some(state) = self.state.take() {
            state.sink.finish()?;
        }
        self.open_file(false)
    }

    fn open_file(&mut self, append: bool) -> Result<()> {
        // Encrypted files always start fresh: appending would reuse the IV.
        let encrypted = matches!(self.header, HeaderKind::Binary { encrypt: true, .. });
        let append = append && !encrypted;

        let now = Utc::now();
        let (path, file_ts, append) = self.effective_filename(now, append)?;
        self.rotater = FileRotater::new(self.options.rotate);
        self.rotater.initialize(file_ts);

        let file = if append {
            OpenOptions::new().append(true).create(true).open(&path)?
        } else {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?
        };
        let on_disk = file.metadata()?.len();
        let capacity = if self.options.buffer > 0 {
            self.options.buffer
        } else {
            INTERNAL_BUFFER
        };
        let buffered = BufWriter::with_capacity(capacity, file);

        let (sink, written) = match &self.header {
            HeaderKind::Binary { encrypt: true, key } => {
                let mut buffered = buffered;
                buffered.write_all(ENCRYPTED_MAGIC)?;
                let iv = derive_iv(now.timestamp_millis());
                buffered.write_all(&iv)?;
                let key: &[u8; KEY_SIZE] = key.as_slice().try_into().map_err(|_| {
                    SilogError::option("encryption key must be exactly 16 bytes")
                })?;
                let mut sink = CipherWriter::new(buffered, key, &iv);
                sink.write_all(BINARY_MAGIC)?;
                (FileSink::Encrypted(sink), 24u64)
            }
            HeaderKind::Binary { encrypt: false, .. } => {
                let mut buffered = buffered;
                let mut written = on_disk;
                if on_disk == 0 {
                    buffered.write_all(BINARY_MAGIC)?;
                    written = BINARY_MAGIC.len() as u64;
                }
                (FileSink::Plain(buffered), written)
            }
            HeaderKind::Text => {
                let mut buffered = buffered;
                let mut written = on_disk;
                if on_disk == 0 {
                    buffered.write_all(b"\xef\xbb\xbf")?;
                    written = 3;
                }
                (FileSink::Plain(buffered), written)
            }
        };
        debug!(path = %path.display(), append, "log file opened");
        self.state = Some(OpenFile {
            sink,
            path,
            written,
            unflushed: 0,
        });

        if self.options.is_rotating() && self.options.max_parts > 0 {
            self.prune_parts()?;
        }
        Ok(())
    }

    /// Picks the file to open. Rotating protocols use timestamped names;
    /// in append mode the newest part is reused while it still belongs to
    /// the current rotation bucket.
    fn effective_filename(
        &self,
        now: DateTime<Utc>,
        append: bool,
    ) -> Result<(PathBuf, DateTime<Utc>, bool)> {
        if !self.options.is_rotating() {
            return Ok((self.options.filename.clone(), now, append));
        }
        if append {
            if let Some((path, ts)) = find_siblings(&self.options.filename)?.pop() {
                let same_bucket = {
                    let mut probe = FileRotater::new(self.options.rotate);
                    probe.initialize(ts);
                    !probe.update(now)
                };
                if self.options.rotate == RotateMode::None || same_bucket {
                    return Ok((path, ts, true));
                }
            }
        }
        // Size-based rotation can cut several files within one second;
        // bump the stamp until the name is unused.
        let mut ts = now;
        let mut path = stamped_path(&self.options.filename, ts);
        while path.exists() {
            ts += chrono::Duration::seconds(1);
            path = stamped_path(&self.options.filename, ts);
        }
        Ok((path, ts, false))
    }

    fn prune_parts(&self) -> Result<()> {
        let mut siblings = find_siblings(&self.options.filename)?;
        let max_parts = self.options.max_parts as usize;
        if siblings.len() <= max_parts {
            return Ok(());
        }
        siblings.truncate(siblings.len() - max_parts);
        for (path, _) in siblings {
            debug!(path = %path.display(), "pruning rotated log part");
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    #[cfg(test)]
    fn current_path(&self) -> Option<&Path> {
        self.state.as_ref().map(|s| s.path.as_path())
    }
}

/// `<stem>-YYYY-MM-DD-HH-mm-ss<.ext>` next to the configured file name.
fn stamped_path(base: &Path, ts: DateTime<Utc>) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("log");
    let name = match base.extension().and_then(OsStr::to_str) {
        Some(ext) => format!("{stem}-{}.{ext}", ts.format(TIMESTAMP_FORMAT)),
        None => format!("{stem}-{}", ts.format(TIMESTAMP_FORMAT)),
    };
    base.with_file_name(name)
}

/// Extracts the rotation timestamp from a sibling of `base`, if the name
/// matches the rotation pattern.
fn sibling_timestamp(base: &Path, candidate: &str) -> Option<DateTime<Utc>> {
    let stem = base.file_stem().and_then(OsStr::to_str)?;
    let rest = candidate.strip_prefix(stem)?.strip_prefix('-')?;
    let stamp = match base.extension().and_then(OsStr::to_str) {
        Some(ext) => rest.strip_suffix(ext)?.strip_suffix('.')?,
        None => rest,
    };
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some(naive.and_utc())
}

/// All rotation parts for `base`, sorted oldest first.
fn find_siblings(base: &Path) -> io::Result<Vec<(PathBuf, DateTime<Utc>)>> {
    let dir = match base.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut siblings = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(ts) = sibling_timestamp(base, name) {
            siblings.push((entry.path(), ts));
        }
    }
    siblings.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(siblings)
}

/// IV derivation kept bit-compatible with existing log consumers: the MD5
/// digest of the current wall-clock millisecond count. Predictable by
/// design; changing it would break the file format.
fn derive_iv(millis: i64) -> [u8; 16] {
    md5::compute((millis as u64).to_le_bytes()).0
}

/// AES-128-CBC encrypting writer with PKCS7 padding on finalization.
///
/// Complete cipher blocks are written through immediately; the trailing
/// partial block is held back until [`finish`](Self::finish).
struct CipherWriter<W: Write> {
    inner: W,
    cipher: Aes128CbcEnc,
    pending: Vec<u8>,
}

impl<W: Write> CipherWriter<W> {
    fn new(inner: W, key: &[u8; KEY_SIZE], iv: &[u8; 16]) -> CipherWriter<W> {
        CipherWriter {
            inner,
            cipher: Aes128CbcEnc::new(key.into(), iv.into()),
            pending: Vec::with_capacity(32),
        }
    }

    fn drain_blocks(&mut self) -> io::Result<()> {
        while self.pending.len() >= 16 {
            let mut block = Block::<Aes128>::default();
            block.copy_from_slice(&self.pending[..16]);
            self.cipher.encrypt_block_mut(&mut block);
            self.inner.write_all(block.as_slice())?;
            self.pending.drain(..16);
        }
        Ok(())
    }

    fn finish(mut self) -> io::Result<W> {
        let pad = 16 - (self.pending.len() % 16);
        self.pending.extend(std::iter::repeat(pad as u8).take(pad));
        self.drain_blocks()?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.drain_blocks()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// The binary log-file protocol.
pub struct FileProtocol {
    engine: FileEngine,
    formatter: BinaryFormatter,
    encrypt: bool,
    key: Vec<u8>,
}

impl FileProtocol {
    pub fn new() -> FileProtocol {
        FileProtocol {
            engine: FileEngine::new(
                FileOptions::load(&LookupTable::new(), DEFAULT_FILENAME),
                HeaderKind::Binary {
                    encrypt: false,
                    key: Vec::new(),
                },
            ),
            formatter: BinaryFormatter::new(),
            encrypt: false,
            key: Vec::new(),
        }
    }
}

impl Default for FileProtocol {
    fn default() -> Self {
        FileProtocol::new()
    }
}

impl ProtocolImpl for FileProtocol {
    fn name(&self) -> &'static str {
        "file"
    }

    fn is_valid_option(&self, key: &str) -> bool {
        matches!(
            key,
            "filename" | "append" | "buffer" | "encrypt" | "key" | "rotate" | "maxsize"
                | "maxparts"
        )
    }

    fn load_options(&mut self, options: &LookupTable) {
        self.encrypt = options.get_bool("encrypt", false);
        self.key = options.get_bytes("key", KEY_SIZE, &[]);
        self.engine = FileEngine::new(
            FileOptions::load(options, DEFAULT_FILENAME),
            HeaderKind::Binary {
                encrypt: self.encrypt,
                key: self.key.clone(),
            },
        );
    }

    fn build_options(&self, builder: &mut ConnectionsBuilder) {
        self.engine.options.build(builder);
        if self.encrypt {
            builder.add_option("encrypt", true);
        }
    }

    fn internal_connect(&mut self) -> Result<()> {
        if self.encrypt && self.key.len() != KEY_SIZE {
            return Err(SilogError::option(
                "encrypt=true requires a key of exactly 16 bytes",
            ));
        }
        self.engine.connect()
    }

    fn internal_write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.engine.write_packet(&mut self.formatter, packet)
    }

    fn internal_disconnect(&mut self) -> Result<()> {
        self.engine.disconnect()
    }
}
