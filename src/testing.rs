//! In-memory stand-ins for the board peripherals, shared by the unit tests

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_io::ErrorKind;
use embedded_io_async::{ErrorType, Read, Write};

use crate::battery::Battery;
use crate::bmp::{HEADER_SIZE, SOURCE_ROW_BYTES};
use crate::clock::Clock;
use crate::display::{Display, RefreshMode, draw_screen};
use crate::framebuffer::{Framebuffer, HEIGHT, WIDTH};
use crate::http::{Connector, HttpError, Url};
use crate::input::{Button, Input};
use crate::power::{FirmwareSlots, Power, Slot, SlotError};
use crate::screen::Screen;
use crate::storage::{Storage, StorageError};
use crate::wifi::{NetError, Network};

/// Virtual clock: delays complete at once and move time forward
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }

    async fn delay_ms(&self, ms: u32) {
        self.advance(ms as u64);
    }
}

#[derive(Debug, Default)]
struct ConnStats {
    open: Cell<usize>,
    max_open: Cell<usize>,
    released: Cell<usize>,
}

/// Byte stream replaying a canned server response
pub struct MockConn {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    stall_at: Option<usize>,
    read_delay: Option<(FakeClock, u64)>,
    written: Rc<RefCell<Vec<u8>>>,
    stats: Option<Rc<ConnStats>>,
}

impl MockConn {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            chunk: usize::MAX,
            stall_at: None,
            read_delay: None,
            written: Rc::default(),
            stats: None,
        }
    }

    /// Hand out at most `n` bytes per read
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk = n;
        self
    }

    /// Deliver the first `n` bytes, then never complete another read
    pub fn stall_after(mut self, n: usize) -> Self {
        self.stall_at = Some(n);
        self
    }

    /// Every read takes `ms` of virtual time
    pub fn with_read_delay(mut self, clock: &FakeClock, ms: u64) -> Self {
        self.read_delay = Some((clock.clone(), ms));
        self
    }

    /// Everything written to the connection so far
    pub fn written(&self) -> Rc<RefCell<Vec<u8>>> {
        self.written.clone()
    }
}

impl Drop for MockConn {
    fn drop(&mut self) {
        if let Some(stats) = &self.stats {
            stats.open.set(stats.open.get() - 1);
            stats.released.set(stats.released.get() + 1);
        }
    }
}

impl ErrorType for MockConn {
    type Error = ErrorKind;
}

impl Read for MockConn {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if let Some((clock, ms)) = &self.read_delay {
            clock.advance(*ms);
        }
        let limit = self.stall_at.map_or(self.data.len(), |n| n.min(self.data.len()));
        if self.pos >= limit {
            if self.stall_at.is_some() {
                core::future::pending::<()>().await;
            }
            return Ok(0);
        }
        let n = buf.len().min(self.chunk).min(limit - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for MockConn {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Hands out scripted connections in order and tracks their lifetimes
#[derive(Default)]
pub struct ScriptedConnector {
    responses: VecDeque<MockConn>,
    failure: Option<HttpError>,
    stats: Rc<ConnStats>,
    connects: usize,
    insecure: Vec<bool>,
    written: Vec<Rc<RefCell<Vec<u8>>>>,
}

impl ScriptedConnector {
    pub fn new(responses: Vec<MockConn>) -> Self {
        Self {
            responses: responses.into(),
            ..Self::default()
        }
    }

    /// Every connect attempt fails with `error`
    pub fn failing(error: HttpError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects
    }

    /// Connections handed out and dropped again
    pub fn released(&self) -> usize {
        self.stats.released.get()
    }

    /// Most connections open at the same time
    pub fn max_open(&self) -> usize {
        self.stats.max_open.get()
    }

    pub fn insecure_flags(&self) -> Vec<bool> {
        self.insecure.clone()
    }

    /// Raw request text sent on each connection
    pub fn requests(&self) -> Vec<String> {
        self.written
            .iter()
            .map(|w| String::from_utf8_lossy(&w.borrow()).into_owned())
            .collect()
    }
}

impl Connector for ScriptedConnector {
    type Connection<'a> = MockConn;

    async fn connect<'a>(
        &'a mut self,
        _url: &Url<'_>,
        insecure_tls: bool,
    ) -> Result<MockConn, HttpError> {
        self.connects += 1;
        self.insecure.push(insecure_tls);
        if let Some(error) = self.failure {
            return Err(error);
        }
        let mut conn = self.responses.pop_front().ok_or(HttpError::Connect)?;

        let open = self.stats.open.get() + 1;
        self.stats.open.set(open);
        self.stats.max_open.set(self.stats.max_open.get().max(open));
        conn.stats = Some(self.stats.clone());
        self.written.push(conn.written());
        Ok(conn)
    }
}

/// Raw HTTP/1.1 response with a Content-Length header
pub fn http_response(status: u16, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {} Status\r\n", status);
    for (name, value) in headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));

    let mut out = head.into_bytes();
    out.extend_from_slice(body);
    out
}

/// Palette entries in file order (blue, green, red)
pub const BLACK: [u8; 3] = [0, 0, 0];
pub const WHITE: [u8; 3] = [255, 255, 255];

/// Well-formed 800x480 1-bit bottom-up bitmap. Every byte of source row `r`
/// is `row(r)`.
pub fn bmp_image(palette: [[u8; 3]; 2], row: impl Fn(u32) -> u8) -> Vec<u8> {
    let pixel_offset = HEADER_SIZE + 8;
    let pixel_bytes = SOURCE_ROW_BYTES * HEIGHT as usize;
    let file_size = pixel_offset + pixel_bytes;

    let mut data = Vec::with_capacity(file_size);
    data.extend_from_slice(b"BM");
    data.extend_from_slice(&(file_size as u32).to_le_bytes());
    data.extend_from_slice(&[0; 4]);
    data.extend_from_slice(&(pixel_offset as u32).to_le_bytes());

    data.extend_from_slice(&40u32.to_le_bytes());
    data.extend_from_slice(&(WIDTH as i32).to_le_bytes());
    data.extend_from_slice(&(HEIGHT as i32).to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&1u16.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&(pixel_bytes as u32).to_le_bytes());
    data.extend_from_slice(&2835i32.to_le_bytes());
    data.extend_from_slice(&2835i32.to_le_bytes());
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());

    for [b, g, r] in palette {
        data.extend_from_slice(&[b, g, r, 0]);
    }
    for src_row in 0..HEIGHT {
        data.resize(data.len() + SOURCE_ROW_BYTES, row(src_row));
    }
    data
}

/// Records refreshes and the screens shown
pub struct FakeDisplay {
    pub framebuffer: Option<Framebuffer>,
    pub refreshes: Vec<RefreshMode>,
    /// `Debug` rendering of each screen passed to `show`
    pub shown: Vec<String>,
}

impl FakeDisplay {
    pub fn new() -> Self {
        Self {
            framebuffer: Some(Framebuffer::new()),
            refreshes: Vec::new(),
            shown: Vec::new(),
        }
    }

    pub fn without_framebuffer() -> Self {
        Self {
            framebuffer: None,
            ..Self::new()
        }
    }
}

impl Display for FakeDisplay {
    fn framebuffer(&mut self) -> Option<&mut Framebuffer> {
        self.framebuffer.as_mut()
    }

    fn refresh(&mut self, mode: RefreshMode) {
        self.refreshes.push(mode);
    }

    fn show(&mut self, screen: &Screen<'_>) {
        self.shown.push(format!("{:?}", screen));
        draw_screen(self, screen);
    }
}

/// Files held in memory
#[derive(Default)]
pub struct MemStorage {
    ready: bool,
    files: Vec<(String, Vec<u8>)>,
    failure: Option<StorageError>,
}

impl MemStorage {
    pub fn with_file(path: &str, contents: Vec<u8>) -> Self {
        Self {
            ready: true,
            files: vec![(path.into(), contents)],
            failure: None,
        }
    }

    /// Card present, no files
    pub fn empty() -> Self {
        Self {
            ready: true,
            ..Self::default()
        }
    }

    pub fn not_ready() -> Self {
        Self::default()
    }

    /// Every read fails with `error`
    pub fn failing(error: StorageError) -> Self {
        Self {
            ready: true,
            failure: Some(error),
            ..Self::default()
        }
    }
}

impl Storage for MemStorage {
    fn is_ready(&mut self) -> bool {
        self.ready
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, StorageError> {
        if let Some(error) = self.failure {
            return Err(error);
        }
        let (_, contents) = self
            .files
            .iter()
            .find(|(name, _)| name == path)
            .ok_or(StorageError::NotFound)?;
        if contents.is_empty() {
            return Err(StorageError::Empty);
        }
        Ok(contents.clone())
    }
}

/// Replays a fixed sequence of polls, then reports no input
pub struct ScriptedInput {
    events: VecDeque<Option<Button>>,
}

impl ScriptedInput {
    pub fn new<const N: usize>(events: [Option<Button>; N]) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub fn idle() -> Self {
        Self::new([])
    }
}

impl Input for ScriptedInput {
    fn poll(&mut self) -> Option<Button> {
        self.events.pop_front().flatten()
    }
}

pub struct FakeBattery(pub Option<f32>);

impl Battery for FakeBattery {
    fn voltage(&mut self) -> Option<f32> {
        self.0
    }
}

/// Radio that associates a fixed time after the join starts
pub struct FakeNetwork {
    clock: Option<FakeClock>,
    join_ms: u64,
    started_ms: Option<u64>,
    failure: Option<NetError>,
    pub joined_ssid: Option<String>,
}

impl FakeNetwork {
    pub fn joins_after(clock: &FakeClock, ms: u64) -> Self {
        Self {
            clock: Some(clock.clone()),
            join_ms: ms,
            started_ms: None,
            failure: None,
            joined_ssid: None,
        }
    }

    pub fn never_joins() -> Self {
        Self {
            clock: None,
            join_ms: 0,
            started_ms: None,
            failure: None,
            joined_ssid: None,
        }
    }

    /// The join request itself fails with `error`
    pub fn failing(error: NetError) -> Self {
        Self {
            failure: Some(error),
            ..Self::never_joins()
        }
    }
}

impl Network for FakeNetwork {
    async fn begin_join(&mut self, ssid: &str, _password: &str) -> Result<(), NetError> {
        if let Some(error) = self.failure {
            return Err(error);
        }
        self.started_ms = Some(self.clock.as_ref().map_or(0, FakeClock::now_ms));
        self.joined_ssid = Some(ssid.into());
        Ok(())
    }

    fn is_joined(&mut self) -> bool {
        match (&self.clock, self.started_ms) {
            (Some(clock), Some(started)) => clock.now_ms() >= started + self.join_ms,
            _ => false,
        }
    }

    fn rssi(&mut self) -> Option<i8> {
        Some(-60)
    }

    fn mac_address(&mut self) -> [u8; 6] {
        [0x24, 0x0a, 0xc4, 0x00, 0x00, 0x01]
    }
}

pub struct FakeSlots {
    running: Option<Slot>,
    alternate: Option<Slot>,
    reject: bool,
    /// Slot selected for the next boot
    pub boot: Option<Slot>,
}

impl FakeSlots {
    pub fn new(running: Option<Slot>, alternate: Option<Slot>) -> Self {
        Self {
            running,
            alternate,
            reject: false,
            boot: None,
        }
    }

    /// Refuse to change the boot slot
    pub fn rejecting(mut self) -> Self {
        self.reject = true;
        self
    }
}

impl FirmwareSlots for FakeSlots {
    fn running(&mut self) -> Option<Slot> {
        self.running
    }

    fn alternate(&mut self) -> Option<Slot> {
        self.alternate
    }

    fn set_boot(&mut self, slot: Slot) -> Result<(), SlotError> {
        if self.reject {
            return Err(SlotError::SwitchRejected);
        }
        self.boot = Some(slot);
        Ok(())
    }
}

/// Logs the call and unwinds in place of never returning
#[derive(Default)]
pub struct FakePower {
    pub log: Rc<RefCell<Vec<String>>>,
}

impl Power for FakePower {
    fn deep_sleep(&mut self, seconds: u32) -> ! {
        self.log.borrow_mut().push(format!("deep_sleep {}", seconds));
        panic!("deep sleep");
    }

    fn restart(&mut self) -> ! {
        self.log.borrow_mut().push("restart".into());
        panic!("restart");
    }
}
