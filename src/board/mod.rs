//! Physical I/O. The automation core only sees the [`Board`] trait.

pub mod serial;

use crate::consts::{BoardIdx, PinIdx, INPUT_PINS, OUTPUT_PINS, RELAYS};
use std::fmt;
use std::str::FromStr;

pub use serial::{SerialBoard, SerialTasks};

/// Which kind of physical output an actuator drives.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum OutputKind {
    /// Open-collector output pin (lights, dimmers).
    Pin,
    /// On-board relay.
    Relay,
}

/// Board + pin/relay pair, written `(board,index)` in configuration.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Point {
    pub board: BoardIdx,
    pub index: PinIdx,
}

impl Point {
    pub fn new(board: BoardIdx, index: PinIdx) -> Self {
        Self { board, index }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.board, self.index)
    }
}

impl FromStr for Point {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| format!("address {:?} is not in (board,index) form", s))?;
        let (board, index) = inner
            .split_once(',')
            .ok_or_else(|| format!("address {:?} is missing a comma", s))?;
        let board = board
            .trim()
            .parse::<BoardIdx>()
            .map_err(|_| format!("board in {:?} is not a 0-255 number", s))?;
        let index = index
            .trim()
            .parse::<PinIdx>()
            .map_err(|_| format!("index in {:?} is not a 0-255 number", s))?;
        Ok(Point { board, index })
    }
}

/// Board abstraction used by the processes. Reads return `None` for an
/// address outside the detected boards; writes to such addresses are ignored.
pub trait Board {
    /// Number of detected boards.
    fn boards(&self) -> BoardIdx;
    fn read_input(&mut self, point: Point) -> Option<bool>;
    fn write_output(&mut self, point: Point, on: bool);
    fn write_relay(&mut self, point: Point, on: bool);

    fn write(&mut self, kind: OutputKind, point: Point, on: bool) {
        match kind {
            OutputKind::Pin => self.write_output(point, on),
            OutputKind::Relay => self.write_relay(point, on),
        }
    }
}

/// In-memory board stack. Used for dry runs and tests.
#[derive(Debug, Clone)]
pub struct MemoryBoard {
    inputs: Vec<[bool; INPUT_PINS as usize]>,
    outputs: Vec<[bool; OUTPUT_PINS as usize]>,
    relays: Vec<[bool; RELAYS as usize]>,
}

impl MemoryBoard {
    pub fn new(boards: BoardIdx) -> Self {
        let count = boards as usize;
        Self {
            inputs: vec![[false; INPUT_PINS as usize]; count],
            outputs: vec![[false; OUTPUT_PINS as usize]; count],
            relays: vec![[false; RELAYS as usize]; count],
        }
    }

    /// Simulate a button being held (true) or released (false).
    pub fn set_input(&mut self, point: Point, on: bool) {
        if let Some(pin) = self
            .inputs
            .get_mut(point.board as usize)
            .and_then(|b| b.get_mut(point.index as usize))
        {
            *pin = on;
        }
    }

    pub fn output(&self, point: Point) -> Option<bool> {
        self.outputs
            .get(point.board as usize)
            .and_then(|b| b.get(point.index as usize))
            .copied()
    }

    pub fn relay(&self, point: Point) -> Option<bool> {
        self.relays
            .get(point.board as usize)
            .and_then(|b| b.get(point.index as usize))
            .copied()
    }
}

impl Board for MemoryBoard {
    fn boards(&self) -> BoardIdx {
        self.inputs.len() as BoardIdx
    }

    fn read_input(&mut self, point: Point) -> Option<bool> {
        self.inputs
            .get(point.board as usize)
            .and_then(|b| b.get(point.index as usize))
            .copied()
    }

    fn write_output(&mut self, point: Point, on: bool) {
        if let Some(pin) = self
            .outputs
            .get_mut(point.board as usize)
            .and_then(|b| b.get_mut(point.index as usize))
        {
            *pin = on;
        }
    }

    fn write_relay(&mut self, point: Point, on: bool) {
        if let Some(relay) = self
            .relays
            .get_mut(point.board as usize)
            .and_then(|b| b.get_mut(point.index as usize))
        {
            *relay = on;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_parses_config_form() {
        assert_eq!("(0,1)".parse::<Point>(), Ok(Point::new(0, 1)));
        assert_eq!(" ( 3 , 7 ) ".parse::<Point>(), Ok(Point::new(3, 7)));
        assert!("0,1".parse::<Point>().is_err());
        assert!("(0;1)".parse::<Point>().is_err());
        assert!("(a,1)".parse::<Point>().is_err());
        assert_eq!(Point::new(2, 5).to_string(), "(2,5)");
    }

    #[test]
    fn memory_board_ignores_missing_boards() {
        let mut board = MemoryBoard::new(1);
        board.write_relay(Point::new(0, 1), true);
        board.write_relay(Point::new(4, 1), true);
        board.write_output(Point::new(0, 9), true);
        assert_eq!(board.relay(Point::new(0, 1)), Some(true));
        assert_eq!(board.relay(Point::new(4, 1)), None);
        assert_eq!(board.read_input(Point::new(1, 0)), None);
    }

    #[test]
    fn write_routes_by_kind() {
        let mut board = MemoryBoard::new(1);
        board.write(OutputKind::Pin, Point::new(0, 2), true);
        board.write(OutputKind::Relay, Point::new(0, 0), true);
        assert_eq!(board.output(Point::new(0, 2)), Some(true));
        assert_eq!(board.relay(Point::new(0, 0)), Some(true));
        assert_eq!(board.relay(Point::new(0, 1)), Some(false));
    }
}
