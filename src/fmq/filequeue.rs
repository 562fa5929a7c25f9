pub mod filequeue {
    use crate::fmq::lock::lock::QueueLock;
    use crate::fmq::store::store::*;
    use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
    use flate2::read::GzDecoder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use log::{debug, info, trace, warn};
    use std::ffi::OsString;
    use std::fs::{self, File, OpenOptions};
    use std::io::{Cursor, Read, Seek, SeekFrom, Write};
    use std::path::{Path, PathBuf};
    use std::process;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    const STAT_MAGIC: u32 = 0x464d_5131; // "FMQ1"
    const HEADER_LEN: usize = 36;
    const SLOT_LEN: usize = 40;
    const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
    const BLOCKING_POLL: Duration = Duration::from_millis(10);

    static NEXT_HANDLE: AtomicUsize = AtomicUsize::new(0);

    // Queue-wide state kept at the front of the .stat file.

    #[derive(Debug, Clone, PartialEq)]
    struct QueueStat {
        nslots: i32,
        buf_size: i32,
        youngest_id: i32,
        youngest_slot: i32,
        oldest_slot: i32,
        write_offset: i32,
        blocking_write: bool,
        last_id_read: i32,
    }

    // One entry of the slot table.  `offset`/`stored_len` locate the
    // bytes in the .buf ring; `msg_len` is the uncompressed length.

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    struct Slot {
        active: bool,
        id: i32,
        msg_type: i32,
        subtype: i32,
        time: i64,
        offset: i32,
        stored_len: i32,
        msg_len: i32,
        compressed: bool,
    }

    impl Slot {
        fn overlaps(&self, offset: i32, len: i32) -> bool {
            let (start, end) = (self.offset as i64, self.offset as i64 + self.stored_len as i64);
            self.active
                && self.stored_len > 0
                && len > 0
                && start < offset as i64 + len as i64
                && (offset as i64) < end
        }
    }

    struct DmapRegistration {
        interval: Duration,
        last: Option<Instant>,
    }

    ///
    /// A file backed message queue.  A queue named `path` lives in two
    /// files:
    ///
    /// *   `path.stat` - the queue header and the slot table.
    /// *   `path.buf`  - the ring of message bytes.
    ///
    /// A third file, `path.lock`, exists while some handle is modifying
    /// the queue.  Every operation re-reads the slot table so that handles
    /// in other sessions (or processes) see each other's writes.
    ///
    pub struct FileQueue {
        handle_id: usize,
        path: PathBuf,
        open: bool,
        open_mode: OpenMode,
        proc_name: String,
        verbose: bool,
        buf_file: Option<File>,
        last_id_read: i32,
        last_slot_read: i32,
        compress: bool,
        compression: CompressionMethod,
        server_mode: bool,
        blocking_write: bool,
        single_writer: bool,
        dmap: Option<DmapRegistration>,
        err_str: String,
    }

    impl FileQueue {
        pub fn new() -> FileQueue {
            FileQueue {
                handle_id: NEXT_HANDLE.fetch_add(1, Ordering::SeqCst),
                path: PathBuf::new(),
                open: false,
                open_mode: OpenMode::ReadOnly,
                proc_name: String::new(),
                verbose: false,
                buf_file: None,
                last_id_read: -1,
                last_slot_read: -1,
                compress: false,
                compression: CompressionMethod::Gzip,
                server_mode: false,
                blocking_write: false,
                single_writer: false,
                dmap: None,
                err_str: String::new(),
            }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn stat_path(&self) -> PathBuf {
            with_suffix(&self.path, ".stat")
        }
        fn buf_path(&self) -> PathBuf {
            with_suffix(&self.path, ".buf")
        }
        fn lock_path(&self) -> PathBuf {
            with_suffix(&self.path, ".lock")
        }

        fn io_error(&self, path: &Path, e: std::io::Error) -> StoreError {
            StoreError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
        }

        // Remember the outcome of a public operation for err_str().

        fn record<T>(&mut self, result: Result<T, StoreError>) -> Result<T, StoreError> {
            match &result {
                Ok(_) => self.err_str.clear(),
                Err(e) => {
                    self.err_str = e.to_string();
                    if self.verbose {
                        debug!("{}: {} failed: {}", self.proc_name, self.path.display(), e);
                    }
                }
            }
            result
        }

        fn check_open(&self) -> Result<(), StoreError> {
            if self.open {
                Ok(())
            } else {
                Err(StoreError::NotOpen)
            }
        }

        fn lock(&self) -> Result<QueueLock, StoreError> {
            QueueLock::acquire(&self.lock_path(), LOCK_TIMEOUT)
        }

        fn lock_unless_single_writer(&self) -> Result<Option<QueueLock>, StoreError> {
            if self.single_writer {
                Ok(None)
            } else {
                Ok(Some(self.lock()?))
            }
        }

        /////////////////////////////////////////////////////////////
        // Stat file I/O.

        fn read_stat(&self) -> Result<(QueueStat, Vec<Slot>), StoreError> {
            let stat_path = self.stat_path();
            let bytes = fs::read(&stat_path).map_err(|e| self.io_error(&stat_path, e))?;
            decode_stat(&bytes).map_err(|reason| StoreError::Corrupt {
                path: stat_path.display().to_string(),
                reason,
            })
        }

        // The stat file is replaced whole, via rename, so readers never
        // see a half written table.

        fn write_stat(&self, stat: &QueueStat, slots: &[Slot]) -> Result<(), StoreError> {
            let stat_path = self.stat_path();
            let mut tmp_name: OsString = stat_path.as_os_str().to_os_string();
            tmp_name.push(format!(".{}.{}", process::id(), self.handle_id));
            let tmp_path = PathBuf::from(tmp_name);
            fs::write(&tmp_path, encode_stat(stat, slots))
                .map_err(|e| self.io_error(&tmp_path, e))?;
            fs::rename(&tmp_path, &stat_path).map_err(|e| self.io_error(&stat_path, e))
        }

        fn read_data(&mut self, slot: &Slot) -> Result<Vec<u8>, StoreError> {
            let buf_path = self.buf_path();
            let file = self.buf_file.as_mut().ok_or(StoreError::NotOpen)?;
            let mut data = vec![0u8; slot.stored_len as usize];
            let result = file
                .seek(SeekFrom::Start(slot.offset as u64))
                .and_then(|_| file.read_exact(&mut data));
            match result {
                Ok(()) => Ok(data),
                Err(e) => Err(StoreError::Io {
                    path: buf_path.display().to_string(),
                    reason: e.to_string(),
                }),
            }
        }

        fn write_data(&mut self, offset: i32, data: &[u8]) -> Result<(), StoreError> {
            let buf_path = self.buf_path();
            let file = self.buf_file.as_mut().ok_or(StoreError::NotOpen)?;
            let result = file
                .seek(SeekFrom::Start(offset as u64))
                .and_then(|_| file.write_all(data))
                .and_then(|_| file.flush());
            result.map_err(|e| StoreError::Io {
                path: buf_path.display().to_string(),
                reason: e.to_string(),
            })
        }

        /////////////////////////////////////////////////////////////
        // Opening.

        fn create(&mut self, num_slots: i32, buf_size: i32) -> Result<(), StoreError> {
            if num_slots <= 0 || buf_size <= 0 {
                return Err(StoreError::Geometry(format!(
                    "num_slots ({}) and buf_size ({}) must be positive",
                    num_slots, buf_size
                )));
            }
            if let Some(dir) = self.path.parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir).map_err(|e| self.io_error(dir, e))?;
                }
            }
            let _lock = self.lock()?;
            let buf_path = self.buf_path();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&buf_path)
                .map_err(|e| self.io_error(&buf_path, e))?;
            file.set_len(buf_size as u64)
                .map_err(|e| self.io_error(&buf_path, e))?;
            let stat = QueueStat {
                nslots: num_slots,
                buf_size,
                youngest_id: -1,
                youngest_slot: -1,
                oldest_slot: 0,
                write_offset: 0,
                blocking_write: self.blocking_write,
                last_id_read: -1,
            };
            let slots = vec![Slot::default(); num_slots as usize];
            self.write_stat(&stat, &slots)?;
            self.buf_file = Some(file);
            info!(
                "{} created queue {} ({} slots, {} byte buffer)",
                self.proc_name,
                self.path.display(),
                num_slots,
                buf_size
            );
            Ok(())
        }

        fn open_existing(&mut self, writable: bool) -> Result<(), StoreError> {
            let (stat, _) = self.read_stat()?;
            let buf_path = self.buf_path();
            let file = OpenOptions::new()
                .read(true)
                .write(writable)
                .open(&buf_path)
                .map_err(|e| self.io_error(&buf_path, e))?;
            let len = file
                .metadata()
                .map_err(|e| self.io_error(&buf_path, e))?
                .len();
            if len != stat.buf_size as u64 {
                return Err(StoreError::Corrupt {
                    path: buf_path.display().to_string(),
                    reason: format!("buffer is {} bytes, expected {}", len, stat.buf_size),
                });
            }
            self.buf_file = Some(file);
            Ok(())
        }

        fn exists(&self) -> bool {
            self.stat_path().exists() && self.buf_path().exists()
        }

        fn wait_for_queue(&self) {
            let mut waited = 0u64;
            while !self.exists() {
                if waited % 10_000 == 0 {
                    debug!("Waiting for queue {} to be created", self.path.display());
                }
                thread::sleep(Duration::from_millis(100));
                waited += 100;
            }
        }

        fn do_init(&mut self, params: &InitParams) -> Result<(), StoreError> {
            if self.open {
                self.do_close();
            }
            self.path = params.path.clone();
            self.proc_name = params.proc_name.clone();
            self.verbose = params.verbose;
            self.open_mode = params.open_mode;
            self.compress = params.compress;
            self.last_id_read = -1;
            self.last_slot_read = -1;

            match params.open_mode {
                OpenMode::Create => self.create(params.num_slots, params.buf_size)?,
                OpenMode::ReadWrite => {
                    if self.exists() {
                        self.open_existing(true)?;
                    } else {
                        self.create(params.num_slots, params.buf_size)?;
                    }
                }
                OpenMode::ReadOnly => {
                    if !self.exists() {
                        return Err(StoreError::NoSuchQueue(self.path.display().to_string()));
                    }
                    self.open_existing(false)?;
                }
                OpenMode::BlockingReadOnly | OpenMode::BlockingReadWrite => {
                    self.wait_for_queue();
                    self.open_existing(params.open_mode.is_writable())?;
                }
            }
            self.open = true;
            if self.blocking_write && self.open_mode.is_writable() {
                self.persist_blocking_write()?;
            }
            self.do_seek(params.open_position.into())?;
            if self.verbose {
                debug!(
                    "{} opened {} mode {:?} position {:?}",
                    self.proc_name,
                    self.path.display(),
                    params.open_mode,
                    params.open_position
                );
            }
            Ok(())
        }

        fn do_close(&mut self) {
            if self.open && self.verbose {
                debug!("{} closing {}", self.proc_name, self.path.display());
            }
            self.buf_file = None;
            self.open = false;
        }

        fn persist_blocking_write(&self) -> Result<(), StoreError> {
            let _lock = self.lock()?;
            let (mut stat, slots) = self.read_stat()?;
            if !stat.blocking_write {
                stat.blocking_write = true;
                self.write_stat(&stat, &slots)?;
            }
            Ok(())
        }

        // Blocking-write queues keep the reader position in the stat file
        // so that writers know what they may overwrite.

        fn publish_read_position(&self) -> Result<(), StoreError> {
            let _lock = self.lock_unless_single_writer()?;
            let (mut stat, slots) = self.read_stat()?;
            if stat.blocking_write {
                stat.last_id_read = self.last_id_read;
                self.write_stat(&stat, &slots)?;
            }
            Ok(())
        }

        /////////////////////////////////////////////////////////////
        // Seeking.

        fn do_seek(&mut self, position: SeekPosition) -> Result<(), StoreError> {
            self.check_open()?;
            let (stat, _) = self.read_stat()?;
            match position {
                SeekPosition::Start => {
                    self.last_slot_read = prev_slot(stat.oldest_slot, stat.nslots);
                    self.last_id_read = -1;
                }
                SeekPosition::End => {
                    self.last_id_read = stat.youngest_id;
                    self.last_slot_read = stat.youngest_slot;
                }
                SeekPosition::Last => {
                    if stat.youngest_id < 0 {
                        self.last_id_read = -1;
                        self.last_slot_read = -1;
                    } else {
                        self.last_id_read = stat.youngest_id - 1;
                        self.last_slot_read = prev_slot(stat.youngest_slot, stat.nslots);
                    }
                }
                SeekPosition::Back => {
                    if self.last_id_read == 0 {
                        self.last_id_read = -1;
                        self.last_slot_read = -1;
                    } else if self.last_id_read > 0 {
                        self.last_id_read -= 1;
                        self.last_slot_read = prev_slot(self.last_slot_read, stat.nslots);
                    }
                }
            }
            if stat.blocking_write {
                self.publish_read_position()?;
            }
            Ok(())
        }

        fn do_seek_to_id(&mut self, id: i32) -> Result<(), StoreError> {
            self.check_open()?;
            let (_, slots) = self.read_stat()?;
            match slots.iter().position(|s| s.active && s.id == id) {
                Some(slot) => {
                    self.last_id_read = id;
                    self.last_slot_read = slot as i32;
                    Ok(())
                }
                None => Err(StoreError::NoSuchId(id)),
            }
        }

        /////////////////////////////////////////////////////////////
        // Reading.

        fn read_next(&mut self) -> Result<Option<Slot>, StoreError> {
            let (stat, slots) = self.read_stat()?;
            if stat.youngest_id < 0 {
                self.last_id_read = -1;
                self.last_slot_read = -1;
                return Ok(None);
            }
            if self.last_id_read == stat.youngest_id {
                return Ok(None);
            }
            let next = next_slot(self.last_slot_read, stat.nslots);
            let candidate = slots[next as usize];
            let in_sequence = candidate.active
                && if self.last_id_read < 0 {
                    next == stat.oldest_slot
                } else {
                    candidate.id == self.last_id_read + 1
                };
            let (slot_num, slot) = if in_sequence {
                (next, candidate)
            } else {
                // The successor was overwritten; resume at the oldest
                // message still stored after it.
                let resume = oldest_active_after(&slots, self.last_id_read)
                    .unwrap_or(stat.youngest_slot);
                let slot = slots[resume as usize];
                if self.last_id_read >= 0 && slot.id != self.last_id_read + 1 {
                    warn!(
                        "{}: reader fell behind on {}, skipping from id {} to {}",
                        self.proc_name,
                        self.path.display(),
                        self.last_id_read,
                        slot.id
                    );
                }
                (resume, slot)
            };
            if !slot.active {
                return Err(StoreError::Corrupt {
                    path: self.stat_path().display().to_string(),
                    reason: format!("youngest slot {} is not active", slot_num),
                });
            }
            self.last_slot_read = slot_num;
            self.last_id_read = slot.id;
            Ok(Some(slot))
        }

        fn do_read(&mut self, requested_type: i32) -> Result<Option<QueueMessage>, StoreError> {
            self.check_open()?;
            let lock = self.lock_unless_single_writer()?;
            let mut found = None;
            while let Some(slot) = self.read_next()? {
                if type_matches(requested_type, slot.msg_type) {
                    found = Some(slot);
                    break;
                }
            }
            let message = match found {
                Some(slot) => {
                    let stored = self.read_data(&slot)?;
                    let (data, compressed) = if slot.compressed && !self.server_mode {
                        (gunzip(&stored)?, false)
                    } else {
                        (stored, slot.compressed)
                    };
                    Some(QueueMessage {
                        id: slot.id,
                        msg_type: slot.msg_type,
                        subtype: slot.subtype,
                        time: slot.time,
                        compressed,
                        uncompressed_len: slot.msg_len,
                        data,
                    })
                }
                None => None,
            };
            drop(lock);
            if message.is_some() {
                let (stat, _) = self.read_stat()?;
                if stat.blocking_write {
                    self.publish_read_position()?;
                }
                self.note_activity();
            }
            Ok(message)
        }

        /////////////////////////////////////////////////////////////
        // Writing.

        fn do_write(
            &mut self,
            msg_type: i32,
            subtype: i32,
            stored: &[u8],
            msg_len: i32,
            compressed: bool,
        ) -> Result<(), StoreError> {
            self.check_open()?;
            if !self.open_mode.is_writable() {
                return Err(StoreError::ReadOnly(self.path.display().to_string()));
            }
            loop {
                let lock = self.lock_unless_single_writer()?;
                let (mut stat, mut slots) = self.read_stat()?;
                if stored.len() > stat.buf_size as usize {
                    return Err(StoreError::TooLarge {
                        len: stored.len(),
                        buf_size: stat.buf_size as usize,
                    });
                }
                let len = stored.len() as i32;
                let wraps = match stat.write_offset.checked_add(len) {
                    Some(end) => end > stat.buf_size,
                    None => true,
                };
                let offset = if wraps { 0 } else { stat.write_offset };
                let write_slot = next_slot(stat.youngest_slot, stat.nslots);

                // Whatever the new message displaces: its slot, the bytes
                // it covers and, on a wrap, the unused tail of the ring.
                // Everything older goes with them so ids stay contiguous.
                let horizon = slots
                    .iter()
                    .enumerate()
                    .filter(|(i, s)| {
                        s.active
                            && (*i as i32 == write_slot
                                || s.overlaps(offset, len)
                                || (wraps && s.stored_len > 0 && s.offset >= stat.write_offset))
                    })
                    .map(|(_, s)| s.id)
                    .max();
                let doomed: Vec<usize> = match horizon {
                    Some(horizon) => slots
                        .iter()
                        .enumerate()
                        .filter(|(_, s)| s.active && s.id <= horizon)
                        .map(|(i, _)| i)
                        .collect(),
                    None => Vec::new(),
                };

                if stat.blocking_write
                    && doomed.iter().any(|i| slots[*i].id > stat.last_id_read)
                {
                    // Unread data would be lost; wait for the reader.
                    drop(lock);
                    trace!("{} write blocked on {}", self.proc_name, self.path.display());
                    thread::sleep(BLOCKING_POLL);
                    continue;
                }

                for i in doomed {
                    slots[i].active = false;
                }
                self.write_data(offset, stored)?;
                let write_id = stat.youngest_id + 1;
                slots[write_slot as usize] = Slot {
                    active: true,
                    id: write_id,
                    msg_type,
                    subtype,
                    time: now_secs(),
                    offset,
                    stored_len: len,
                    msg_len,
                    compressed,
                };
                stat.youngest_id = write_id;
                stat.youngest_slot = write_slot;
                stat.write_offset = offset + len;
                stat.oldest_slot = oldest_active(&slots).unwrap_or(write_slot);
                self.write_stat(&stat, &slots)?;
                if self.verbose {
                    debug!(
                        "{} wrote id {} type {} subtype {} ({} bytes) to {}",
                        self.proc_name,
                        write_id,
                        msg_type,
                        subtype,
                        len,
                        self.path.display()
                    );
                }
                break;
            }
            self.note_activity();
            Ok(())
        }

        fn note_activity(&mut self) {
            if let Some(dmap) = self.dmap.as_mut() {
                let due = match dmap.last {
                    Some(last) => last.elapsed() >= dmap.interval,
                    None => true,
                };
                if due {
                    info!(
                        "{} registering {} with the DataMapper",
                        self.proc_name,
                        self.path.display()
                    );
                    dmap.last = Some(Instant::now());
                }
            }
        }
    }

    impl Default for FileQueue {
        fn default() -> FileQueue {
            FileQueue::new()
        }
    }

    impl Drop for FileQueue {
        fn drop(&mut self) {
            self.do_close();
        }
    }

    impl FmqStore for FileQueue {
        fn init(&mut self, params: &InitParams) -> Result<(), StoreError> {
            let result = self.do_init(params);
            if result.is_err() {
                self.do_close();
            }
            self.record(result)
        }
        fn set_server_mode(&mut self) {
            self.server_mode = true;
        }
        fn set_compression_method(&mut self, method: CompressionMethod) {
            self.compression = method;
        }
        fn set_blocking_write(&mut self) {
            self.blocking_write = true;
            if self.open && self.open_mode.is_writable() {
                if let Err(e) = self.persist_blocking_write() {
                    warn!("Unable to mark {} blocking: {}", self.path.display(), e);
                }
            }
        }
        fn set_single_writer(&mut self) {
            self.single_writer = true;
        }
        fn set_register_with_dmap(&mut self, enabled: bool, interval_secs: i32) {
            self.dmap = if enabled {
                Some(DmapRegistration {
                    interval: Duration::from_secs(interval_secs.max(0) as u64),
                    last: None,
                })
            } else {
                None
            };
        }
        fn seek(&mut self, position: SeekPosition) -> Result<(), StoreError> {
            let result = self.do_seek(position);
            self.record(result)
        }
        fn seek_to_id(&mut self, id: i32) -> Result<(), StoreError> {
            let result = self.do_seek_to_id(id);
            self.record(result)
        }
        fn read_msg(&mut self, requested_type: i32) -> Result<Option<QueueMessage>, StoreError> {
            let result = self.do_read(requested_type);
            self.record(result)
        }
        fn write_msg(&mut self, msg_type: i32, subtype: i32, data: &[u8]) -> Result<(), StoreError> {
            let result = if self.compress && self.compression == CompressionMethod::Gzip {
                gzip(data).and_then(|stored| {
                    self.do_write(msg_type, subtype, &stored, data.len() as i32, true)
                })
            } else {
                self.do_write(msg_type, subtype, data, data.len() as i32, false)
            };
            self.record(result)
        }
        fn write_msg_pre_compressed(
            &mut self,
            msg_type: i32,
            subtype: i32,
            data: &[u8],
            uncompressed_len: i32,
        ) -> Result<(), StoreError> {
            let result = self.do_write(msg_type, subtype, data, uncompressed_len, true);
            self.record(result)
        }
        fn close(&mut self) -> Result<(), StoreError> {
            self.do_close();
            Ok(())
        }
        fn err_str(&self) -> String {
            self.err_str.clone()
        }
    }

    ///
    /// Hands each session its own unopened `FileQueue`.
    ///
    #[derive(Debug, Clone, Copy, Default)]
    pub struct FileQueueFactory;

    impl StoreFactory for FileQueueFactory {
        fn create(&self) -> Box<dyn FmqStore> {
            Box::new(FileQueue::new())
        }
    }

    /////////////////////////////////////////////////////////////
    // Helpers.

    fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
        let mut name: OsString = path.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn next_slot(slot: i32, nslots: i32) -> i32 {
        if slot < 0 {
            0
        } else {
            (slot + 1) % nslots
        }
    }

    fn prev_slot(slot: i32, nslots: i32) -> i32 {
        if slot <= 0 {
            nslots - 1
        } else {
            slot - 1
        }
    }

    fn oldest_active_after(slots: &[Slot], id: i32) -> Option<i32> {
        slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.active && s.id > id)
            .min_by_key(|(_, s)| s.id)
            .map(|(i, _)| i as i32)
    }

    fn oldest_active(slots: &[Slot]) -> Option<i32> {
        slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.active)
            .min_by_key(|(_, s)| s.id)
            .map(|(i, _)| i as i32)
    }

    fn now_secs() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }

    fn gzip(data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| StoreError::Compression(e.to_string()))
    }

    fn gunzip(data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        Ok(out)
    }

    fn encode_stat(stat: &QueueStat, slots: &[Slot]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + SLOT_LEN * slots.len());
        // Writes into a Vec cannot fail.
        let _ = encode_stat_into(&mut out, stat, slots);
        out
    }

    fn encode_stat_into(
        out: &mut Vec<u8>,
        stat: &QueueStat,
        slots: &[Slot],
    ) -> std::io::Result<()> {
        out.write_u32::<BigEndian>(STAT_MAGIC)?;
        out.write_i32::<BigEndian>(stat.nslots)?;
        out.write_i32::<BigEndian>(stat.buf_size)?;
        out.write_i32::<BigEndian>(stat.youngest_id)?;
        out.write_i32::<BigEndian>(stat.youngest_slot)?;
        out.write_i32::<BigEndian>(stat.oldest_slot)?;
        out.write_i32::<BigEndian>(stat.write_offset)?;
        out.write_i32::<BigEndian>(stat.blocking_write as i32)?;
        out.write_i32::<BigEndian>(stat.last_id_read)?;
        for slot in slots {
            out.write_i32::<BigEndian>(slot.active as i32)?;
            out.write_i32::<BigEndian>(slot.id)?;
            out.write_i32::<BigEndian>(slot.msg_type)?;
            out.write_i32::<BigEndian>(slot.subtype)?;
            out.write_i64::<BigEndian>(slot.time)?;
            out.write_i32::<BigEndian>(slot.offset)?;
            out.write_i32::<BigEndian>(slot.stored_len)?;
            out.write_i32::<BigEndian>(slot.msg_len)?;
            out.write_i32::<BigEndian>(slot.compressed as i32)?;
        }
        Ok(())
    }

    fn decode_stat(bytes: &[u8]) -> Result<(QueueStat, Vec<Slot>), String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!("stat file is only {} bytes", bytes.len()));
        }
        let mut cursor = Cursor::new(bytes);
        let io = |e: std::io::Error| e.to_string();
        let magic = cursor.read_u32::<BigEndian>().map_err(io)?;
        if magic != STAT_MAGIC {
            return Err(format!("bad magic number {:#x}", magic));
        }
        let stat = QueueStat {
            nslots: cursor.read_i32::<BigEndian>().map_err(io)?,
            buf_size: cursor.read_i32::<BigEndian>().map_err(io)?,
            youngest_id: cursor.read_i32::<BigEndian>().map_err(io)?,
            youngest_slot: cursor.read_i32::<BigEndian>().map_err(io)?,
            oldest_slot: cursor.read_i32::<BigEndian>().map_err(io)?,
            write_offset: cursor.read_i32::<BigEndian>().map_err(io)?,
            blocking_write: cursor.read_i32::<BigEndian>().map_err(io)? != 0,
            last_id_read: cursor.read_i32::<BigEndian>().map_err(io)?,
        };
        if stat.nslots <= 0 || stat.buf_size <= 0 {
            return Err(format!(
                "bad geometry: {} slots, {} bytes",
                stat.nslots, stat.buf_size
            ));
        }
        let expected = (stat.nslots as usize)
            .checked_mul(SLOT_LEN)
            .and_then(|n| n.checked_add(HEADER_LEN));
        if expected != Some(bytes.len()) {
            return Err(format!(
                "stat file is {} bytes, too short or long for {} slots",
                bytes.len(),
                stat.nslots
            ));
        }
        if stat.youngest_slot >= stat.nslots
            || stat.oldest_slot >= stat.nslots
            || stat.oldest_slot < 0
            || (stat.youngest_id >= 0 && stat.youngest_slot < 0)
        {
            return Err(String::from("slot index out of range"));
        }
        let mut slots = Vec::with_capacity(stat.nslots as usize);
        for _ in 0..stat.nslots {
            let slot = Slot {
                active: cursor.read_i32::<BigEndian>().map_err(io)? != 0,
                id: cursor.read_i32::<BigEndian>().map_err(io)?,
                msg_type: cursor.read_i32::<BigEndian>().map_err(io)?,
                subtype: cursor.read_i32::<BigEndian>().map_err(io)?,
                time: cursor.read_i64::<BigEndian>().map_err(io)?,
                offset: cursor.read_i32::<BigEndian>().map_err(io)?,
                stored_len: cursor.read_i32::<BigEndian>().map_err(io)?,
                msg_len: cursor.read_i32::<BigEndian>().map_err(io)?,
                compressed: cursor.read_i32::<BigEndian>().map_err(io)? != 0,
            };
            if slot.active
                && (slot.offset < 0
                    || slot.stored_len < 0
                    || slot.offset as i64 + slot.stored_len as i64 > stat.buf_size as i64)
            {
                return Err(format!("slot id {} lies outside the buffer", slot.id));
            }
            slots.push(slot);
        }
        Ok((stat, slots))
    }

    #[cfg(test)]
    mod filequeue_test {
        use super::*;
        use tempfile::tempdir;

        fn params(path: &Path, mode: OpenMode) -> InitParams {
            InitParams {
                path: path.to_path_buf(),
                proc_name: String::from("filequeue_test"),
                verbose: false,
                open_mode: mode,
                open_position: OpenPosition::Start,
                compress: false,
                num_slots: 8,
                buf_size: 1024,
            }
        }

        fn open(path: &Path, mode: OpenMode) -> FileQueue {
            let mut q = FileQueue::new();
            q.init(&params(path, mode)).unwrap();
            q
        }

        fn drain(q: &mut FileQueue, requested_type: i32) -> Vec<Vec<u8>> {
            let mut result = Vec::new();
            while let Some(msg) = q.read_msg(requested_type).unwrap() {
                result.push(msg.data);
            }
            result
        }

        #[test]
        fn not_open() {
            let mut q = FileQueue::new();
            assert_eq!(Err(StoreError::NotOpen), q.read_msg(ANY_TYPE));
            assert_eq!(Err(StoreError::NotOpen), q.write_msg(1, 0, b"x"));
            assert_eq!(Err(StoreError::NotOpen), q.seek(SeekPosition::End));
            assert_eq!(StoreError::NotOpen.to_string(), q.err_str());
        }
        #[test]
        fn write_then_read_in_order() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut q = open(&path, OpenMode::Create);
            q.write_msg(1, 0, b"one").unwrap();
            q.write_msg(1, 0, b"two").unwrap();
            let msg = q.read_msg(ANY_TYPE).unwrap().unwrap();
            assert_eq!(0, msg.id);
            assert_eq!(b"one".to_vec(), msg.data);
            assert_eq!(vec![b"two".to_vec()], drain(&mut q, ANY_TYPE));
            assert_eq!(None, q.read_msg(ANY_TYPE).unwrap());
            assert_eq!("", q.err_str());
        }
        #[test]
        fn second_handle_sees_writes() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut writer = open(&path, OpenMode::Create);
            let mut reader = open(&path, OpenMode::ReadOnly);
            writer.write_msg(5, 2, b"hello").unwrap();
            let msg = reader.read_msg(ANY_TYPE).unwrap().unwrap();
            assert_eq!((5, 2), (msg.msg_type, msg.subtype));
            assert_eq!(b"hello".to_vec(), msg.data);
            assert_eq!(
                Err(StoreError::ReadOnly(path.display().to_string())),
                reader.write_msg(1, 0, b"x")
            );
        }
        #[test]
        fn type_filter_skips() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut q = open(&path, OpenMode::Create);
            q.write_msg(1, 0, b"a").unwrap();
            q.write_msg(2, 0, b"b").unwrap();
            q.write_msg(1, 0, b"c").unwrap();
            assert_eq!(vec![b"b".to_vec()], drain(&mut q, 2));
            q.seek(SeekPosition::Start).unwrap();
            assert_eq!(vec![b"a".to_vec(), b"c".to_vec()], drain(&mut q, 1));
        }
        #[test]
        fn seek_positions() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut q = open(&path, OpenMode::Create);
            for data in &[b"a", b"b", b"c"] {
                q.write_msg(1, 0, *data).unwrap();
            }
            q.seek(SeekPosition::End).unwrap();
            assert_eq!(None, q.read_msg(ANY_TYPE).unwrap());
            q.seek(SeekPosition::Last).unwrap();
            assert_eq!(vec![b"c".to_vec()], drain(&mut q, ANY_TYPE));
            q.seek(SeekPosition::Back).unwrap();
            q.seek(SeekPosition::Back).unwrap();
            assert_eq!(vec![b"b".to_vec(), b"c".to_vec()], drain(&mut q, ANY_TYPE));
            q.seek_to_id(0).unwrap();
            assert_eq!(vec![b"b".to_vec(), b"c".to_vec()], drain(&mut q, ANY_TYPE));
            assert_eq!(Err(StoreError::NoSuchId(42)), q.seek_to_id(42));
        }
        #[test]
        fn open_at_end_skips_old() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut writer = open(&path, OpenMode::Create);
            writer.write_msg(1, 0, b"old").unwrap();
            let mut p = params(&path, OpenMode::ReadOnly);
            p.open_position = OpenPosition::End;
            let mut reader = FileQueue::new();
            reader.init(&p).unwrap();
            assert_eq!(None, reader.read_msg(ANY_TYPE).unwrap());
            writer.write_msg(1, 0, b"new").unwrap();
            assert_eq!(vec![b"new".to_vec()], drain(&mut reader, ANY_TYPE));
        }
        #[test]
        fn slots_wrap_and_drop_oldest() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut q = open(&path, OpenMode::Create);
            for i in 0..12u8 {
                q.write_msg(1, 0, &[i]).unwrap();
            }
            let mut reader = open(&path, OpenMode::ReadOnly);
            let data = drain(&mut reader, ANY_TYPE);
            let expected: Vec<Vec<u8>> = (4..12u8).map(|i| vec![i]).collect();
            assert_eq!(expected, data);
        }
        #[test]
        fn buffer_wrap_frees_overlapped() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut q = open(&path, OpenMode::Create);
            let big = vec![7u8; 400];
            for _ in 0..3 {
                q.write_msg(1, 0, &big).unwrap();
            }
            // Only two 400 byte messages fit in 1024 bytes.
            let mut reader = open(&path, OpenMode::ReadOnly);
            assert_eq!(2, drain(&mut reader, ANY_TYPE).len());
            let too_big = vec![0u8; 2000];
            match q.write_msg(1, 0, &too_big) {
                Err(StoreError::TooLarge { len: 2000, buf_size: 1024 }) => {}
                other => panic!("expected TooLarge, got {:?}", other),
            }
        }
        #[test]
        fn reader_overrun_resumes_at_oldest_kept() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut writer = open(&path, OpenMode::Create);
            let mut reader = open(&path, OpenMode::ReadOnly);
            writer.write_msg(1, 0, b"first").unwrap();
            assert!(reader.read_msg(ANY_TYPE).unwrap().is_some());
            for i in 0..20u8 {
                writer.write_msg(1, 0, &[i]).unwrap();
            }
            // 8 slots: ids 13..=20 survive, holding 12..=19.
            let msg = reader.read_msg(ANY_TYPE).unwrap().unwrap();
            assert_eq!(13, msg.id);
            assert_eq!(vec![12u8], msg.data);
            let rest: Vec<Vec<u8>> = (13..20u8).map(|i| vec![i]).collect();
            assert_eq!(rest, drain(&mut reader, ANY_TYPE));
        }
        #[test]
        fn buffer_wrap_ages_out_oldest_first() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut p = params(&path, OpenMode::Create);
            p.buf_size = 100;
            let mut writer = FileQueue::new();
            writer.init(&p).unwrap();
            for len in &[60usize, 39, 60, 45, 10] {
                writer.write_msg(1, 0, &vec![*len as u8; *len]).unwrap();
            }
            let (_, slots) = writer.read_stat().unwrap();
            let mut live: Vec<i32> = slots.iter().filter(|s| s.active).map(|s| s.id).collect();
            live.sort();
            assert_eq!(vec![3, 4], live);

            let mut reader = open(&path, OpenMode::ReadOnly);
            let mut got = Vec::new();
            while let Some(msg) = reader.read_msg(ANY_TYPE).unwrap() {
                got.push(msg.id);
            }
            assert_eq!(live, got);
        }
        #[test]
        fn overrun_reader_gets_every_kept_message() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut p = params(&path, OpenMode::Create);
            p.buf_size = 100;
            let mut writer = FileQueue::new();
            writer.init(&p).unwrap();
            let mut reader = open(&path, OpenMode::ReadOnly);
            writer.write_msg(1, 0, &[0u8; 30]).unwrap();
            assert_eq!(0, reader.read_msg(ANY_TYPE).unwrap().unwrap().id);
            for _ in 0..7 {
                writer.write_msg(1, 0, &[1u8; 30]).unwrap();
            }
            let (_, slots) = writer.read_stat().unwrap();
            let mut live: Vec<i32> = slots.iter().filter(|s| s.active).map(|s| s.id).collect();
            live.sort();
            let mut got = Vec::new();
            while let Some(msg) = reader.read_msg(ANY_TYPE).unwrap() {
                got.push(msg.id);
            }
            assert_eq!(live, got);
            assert_eq!(Some(&7), got.last());
        }
        #[test]
        fn overlap_near_i32_max_does_not_overflow() {
            let slot = Slot {
                active: true,
                offset: i32::MAX - 10,
                stored_len: 10,
                ..Slot::default()
            };
            assert!(slot.overlaps(i32::MAX - 5, 10));
            assert!(!slot.overlaps(0, 10));
        }
        #[test]
        fn compression() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut p = params(&path, OpenMode::Create);
            p.compress = true;
            let mut writer = FileQueue::new();
            writer.init(&p).unwrap();
            let text = vec![b'z'; 500];
            writer.write_msg(3, 1, &text).unwrap();

            let mut plain = open(&path, OpenMode::ReadOnly);
            let msg = plain.read_msg(ANY_TYPE).unwrap().unwrap();
            assert!(!msg.compressed);
            assert_eq!(text, msg.data);

            let mut server = open(&path, OpenMode::ReadOnly);
            server.set_server_mode();
            let msg = server.read_msg(ANY_TYPE).unwrap().unwrap();
            assert!(msg.compressed);
            assert_eq!(500, msg.uncompressed_len);
            assert!(msg.data.len() < 500);
            assert_eq!(text, gunzip(&msg.data).unwrap());

            writer.set_compression_method(CompressionMethod::None);
            writer.write_msg(3, 1, b"raw").unwrap();
            let msg = server.read_msg(ANY_TYPE).unwrap().unwrap();
            assert!(!msg.compressed);
            assert_eq!(b"raw".to_vec(), msg.data);
        }
        #[test]
        fn pre_compressed_write() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut q = open(&path, OpenMode::Create);
            let packed = gzip(b"inflate me").unwrap();
            q.write_msg_pre_compressed(1, 0, &packed, 10).unwrap();
            let msg = q.read_msg(ANY_TYPE).unwrap().unwrap();
            assert_eq!(b"inflate me".to_vec(), msg.data);
            assert_eq!(10, msg.uncompressed_len);
        }
        #[test]
        fn open_modes() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("sub").join("q");
            let mut q = FileQueue::new();
            match q.init(&params(&path, OpenMode::ReadOnly)) {
                Err(StoreError::NoSuchQueue(_)) => {}
                other => panic!("expected NoSuchQueue, got {:?}", other),
            }
            let mut rw = open(&path, OpenMode::ReadWrite);
            rw.write_msg(1, 0, b"kept").unwrap();
            rw.close().unwrap();
            let mut again = open(&path, OpenMode::ReadWrite);
            assert_eq!(vec![b"kept".to_vec()], drain(&mut again, ANY_TYPE));
            let mut bad = params(&path, OpenMode::Create);
            bad.num_slots = 0;
            match FileQueue::new().init(&bad) {
                Err(StoreError::Geometry(_)) => {}
                other => panic!("expected Geometry, got {:?}", other),
            }
        }
        #[test]
        fn blocking_flag_persisted() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("q");
            let mut q = open(&path, OpenMode::Create);
            q.set_blocking_write();
            let (stat, _) = q.read_stat().unwrap();
            assert!(stat.blocking_write);
            q.write_msg(1, 0, b"a").unwrap();
            q.read_msg(ANY_TYPE).unwrap();
            let (stat, _) = q.read_stat().unwrap();
            assert_eq!(0, stat.last_id_read);
        }
        #[test]
        fn corrupt_stat_rejected() {
            assert!(decode_stat(&[0u8; 10]).is_err());
            let stat = QueueStat {
                nslots: 2,
                buf_size: 16,
                youngest_id: -1,
                youngest_slot: -1,
                oldest_slot: 0,
                write_offset: 0,
                blocking_write: false,
                last_id_read: -1,
            };
            let mut bytes = encode_stat(&stat, &[Slot::default(); 2]);
            assert_eq!(HEADER_LEN + 2 * SLOT_LEN, bytes.len());
            assert_eq!(stat, decode_stat(&bytes).unwrap().0);
            bytes.pop();
            assert!(decode_stat(&bytes).is_err());
        }
    }
}
