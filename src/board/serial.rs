//! USB-serial I/O expander. Frames follow the io-ctrl USB layout:
//! `!|` preamble, then address, message type, length and 8 data bytes.
use super::{Board, OutputKind, Point};
use crate::consts::{BoardIdx, INPUT_PINS};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const PREAMBULE_LENGTH: usize = 2;
const FRAME_BODY_LENGTH: usize = 3 + 8;
const FRAME_LENGTH: usize = PREAMBULE_LENGTH + FRAME_BODY_LENGTH;

/// Synchronization byte 1.
const SYNC_BYTE_1: u8 = 0x21; // !
/// Sync byte 2 for 3+8 byte content.
const SYNC_BYTE_2: u8 = 0x7C; // |

mod msg_type {
    /// Set output or relay X to Y.
    pub const SET_OUTPUT: u8 = 0x08;
    /// Ask a board to report all of its IO.
    pub const REQUEST_STATUS: u8 = 0x0D;
    /// Current IO state, requested or on change.
    pub const STATUS_IO: u8 = 0x0E;
}

mod io_type {
    pub const INPUT: u8 = 0;
    pub const OUTPUT: u8 = 1;
    pub const RELAY: u8 = 2;
}

/// Raw frame prepared for sending or just received.
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Board address - source for status, destination for requests.
    addr: u8,
    msg_type: u8,
    length: u8,
    data: [u8; 8],
}

impl Frame {
    pub fn from_bytes(addr: u8, msg_type: u8, data: &[u8]) -> Self {
        let mut raw = Self {
            addr,
            msg_type,
            length: data.len() as u8,
            data: [0; 8],
        };
        raw.data[0..data.len()].copy_from_slice(data);
        raw
    }

    pub fn set_output(kind: OutputKind, point: Point, on: bool) -> Self {
        let io = match kind {
            OutputKind::Pin => io_type::OUTPUT,
            OutputKind::Relay => io_type::RELAY,
        };
        Self::from_bytes(point.board, msg_type::SET_OUTPUT, &[point.index, io, on as u8])
    }

    pub fn request_status(board: BoardIdx) -> Self {
        Self::from_bytes(board, msg_type::REQUEST_STATUS, &[])
    }

    /// Input state carried by a status frame: (pin, pressed).
    pub fn input_status(&self) -> Option<Point> {
        if self.msg_type != msg_type::STATUS_IO || self.length != 3 {
            return None;
        }
        if self.data[1] != io_type::INPUT {
            return None;
        }
        Some(Point::new(self.addr, self.data[0]))
    }

    pub fn state(&self) -> bool {
        self.data[2] == 1
    }

    pub fn encode(&self) -> [u8; FRAME_LENGTH] {
        let mut buf = [0u8; FRAME_LENGTH];
        buf[0] = SYNC_BYTE_1;
        buf[1] = SYNC_BYTE_2;
        buf[2] = self.addr;
        buf[3] = self.msg_type;
        buf[4] = self.length;
        buf[5..5 + self.length as usize].copy_from_slice(&self.data[..self.length as usize]);
        buf
    }

    /// Decode a chunk read from the port. Simplified synchronization: a
    /// chunk has to start with the preamble.
    pub fn decode(buf: &[u8]) -> Result<Self, String> {
        if buf.len() < FRAME_LENGTH {
            return Err(format!("invalid frame length {}", buf.len()));
        }
        if buf[0] != SYNC_BYTE_1 || buf[1] != SYNC_BYTE_2 {
            return Err("preambule error".to_string());
        }
        let packet = &buf[PREAMBULE_LENGTH..FRAME_LENGTH];
        let length = packet[2] as usize;
        if length > 8 {
            return Err(format!("invalid data length {}", length));
        }
        Ok(Self::from_bytes(packet[0], packet[1], &packet[3..3 + length]))
    }
}

type InputCache = Arc<Mutex<Vec<[bool; INPUT_PINS as usize]>>>;

/// Board stack behind a serial port. Reader and writer run as tasks; the
/// process loop only touches the input cache and the outgoing channel.
pub struct SerialBoard {
    boards: BoardIdx,
    tx: mpsc::Sender<Frame>,
    inputs: InputCache,
    /// Last state sent per output, to write on change only.
    written: HashMap<(OutputKind, Point), bool>,
}

/// Port tasks. Either finishing means the board is gone.
pub struct SerialTasks {
    pub reader: JoinHandle<anyhow::Result<()>>,
    pub writer: JoinHandle<anyhow::Result<()>>,
}

async fn reader(
    mut port: ReadHalf<tokio_serial::SerialStream>,
    inputs: InputCache,
) -> anyhow::Result<()> {
    let mut buf = [0u8; 512];
    loop {
        let read_len: usize = match port.read(&mut buf).await {
            Ok(count) if count > 0 => count,
            Ok(_) => {
                anyhow::bail!("Reader disconnected");
            }
            Err(e) => {
                warn!("Error while reading port {:?}", e);
                continue;
            }
        };

        let frame = match Frame::decode(&buf[0..read_len]) {
            Ok(frame) => frame,
            Err(reason) => {
                info!(
                    "Synchronization failed - {}. Skipping chunk: {:02x?}",
                    reason,
                    &buf[0..read_len]
                );
                continue;
            }
        };
        debug!("USB->RX: {:?}", frame);

        if let Some(point) = frame.input_status() {
            let mut cache = match inputs.lock() {
                Ok(cache) => cache,
                Err(_) => anyhow::bail!("Input cache poisoned"),
            };
            if let Some(pin) = cache
                .get_mut(point.board as usize)
                .and_then(|b| b.get_mut(point.index as usize))
            {
                *pin = frame.state();
            }
        }
    }
}

async fn writer(
    mut port: WriteHalf<tokio_serial::SerialStream>,
    mut channel: mpsc::Receiver<Frame>,
) -> anyhow::Result<()> {
    while let Some(frame) = channel.recv().await {
        let buf = frame.encode();
        match port.write(&buf).await {
            Ok(size) => {
                debug!("TX->USB: {} bytes: {:02x?}", size, buf);
            }
            Err(err) => {
                anyhow::bail!("Error while sending to port {:?}", err);
            }
        }
    }
    Ok(())
}

impl SerialBoard {
    #[tracing::instrument]
    pub async fn open(
        port_name: String,
        baud_rate: u32,
        boards: BoardIdx,
    ) -> anyhow::Result<(Self, SerialTasks)> {
        let builder = tokio_serial::new(port_name, baud_rate);
        let stream = tokio_serial::SerialStream::open(&builder)?;
        let (port_read, port_write) = tokio::io::split(stream);

        let (tx, rx) = mpsc::channel(32);
        let inputs: InputCache = Arc::new(Mutex::new(vec![
            [false; INPUT_PINS as usize];
            boards as usize
        ]));

        let reader_handle = tokio::spawn(reader(port_read, inputs.clone()));
        let writer_handle = tokio::spawn(writer(port_write, rx));

        for board in 0..boards {
            tx.send(Frame::request_status(board)).await?;
        }

        let board = Self {
            boards,
            tx,
            inputs,
            written: HashMap::new(),
        };
        let tasks = SerialTasks {
            reader: reader_handle,
            writer: writer_handle,
        };
        Ok((board, tasks))
    }

    fn send_on_change(&mut self, kind: OutputKind, point: Point, on: bool) {
        if point.board >= self.boards {
            return;
        }
        if self.written.get(&(kind, point)) == Some(&on) {
            return;
        }
        match self.tx.try_send(Frame::set_output(kind, point, on)) {
            Ok(()) => {
                self.written.insert((kind, point), on);
            }
            Err(err) => {
                // Not recorded, so the next tick writes it again.
                warn!("Unable to queue output change for {}: {}", point, err);
            }
        }
    }
}

impl Board for SerialBoard {
    fn boards(&self) -> BoardIdx {
        self.boards
    }

    fn read_input(&mut self, point: Point) -> Option<bool> {
        let cache = self.inputs.lock().ok()?;
        cache
            .get(point.board as usize)
            .and_then(|b| b.get(point.index as usize))
            .copied()
    }

    fn write_output(&mut self, point: Point, on: bool) {
        self.send_on_change(OutputKind::Pin, point, on);
    }

    fn write_relay(&mut self, point: Point, on: bool) {
        self.send_on_change(OutputKind::Relay, point, on);
    }
}
