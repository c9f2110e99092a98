//! Incremental extraction of text from a console screen buffer
//!
//! The console is prepared by filling every cell with [`FILL_CHAR`]. Cells
//! the target has written to hold real characters; untouched cells still hold
//! the fill character. A run of fill characters that reaches the end of a row
//! therefore marks a line break, while a row written to its last column
//! simply wrapped.
//!
//! [`ConsoleSession::read_to_cursor`] is called once per poll and returns only
//! what changed since the previous call:
//!
//! * nothing, if the cursor and the text up to it are unchanged,
//! * the new suffix, if the current row grew,
//! * `"\r"` followed by the re-read text, if the target redrew the row (for
//!   example a progress counter that returns to column 0).

use std::io;
use tracing::trace;

/// Character every cell holds until the target writes to it.
pub const FILL_CHAR: char = '\u{4}';

/// Largest number of cells fetched from the console in one call.
pub const MAX_READ_CELLS: usize = 4000;

/// A position in the screen buffer, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Coord {
    /// Column
    pub x: usize,
    /// Row
    pub y: usize,
}

impl Coord {
    /// Top-left corner
    pub const ORIGIN: Coord = Coord { x: 0, y: 0 };

    /// Create a coordinate
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

/// Cell-level access to a console screen buffer.
pub trait ScreenBuffer {
    /// Buffer dimensions in cells
    fn size(&self) -> io::Result<Coord>;

    /// Current cursor position
    fn cursor(&self) -> io::Result<Coord>;

    /// Move the cursor
    fn set_cursor(&mut self, at: Coord) -> io::Result<()>;

    /// Read `len` cells starting at `from`, continuing across rows
    fn read_cells(&self, from: Coord, len: usize) -> io::Result<Vec<char>>;

    /// Overwrite cells starting at `at`
    fn write_cells(&mut self, cells: &[char], at: Coord) -> io::Result<()>;

    /// Set `len` cells starting at `at` to `ch`
    fn fill_cells(&mut self, ch: char, len: usize, at: Coord) -> io::Result<()>;
}

/// Read state kept between polls of one console.
#[derive(Debug)]
pub struct ConsoleSession {
    width: usize,
    height: usize,
    /// Where the next read starts, normally the previous cursor position
    current: Coord,
    /// First row after the most recent detected line break
    buffer_y: usize,
    /// Text produced by the previous non-empty read
    last_read_data: String,
    /// Cells read so far, used to find row ends while parsing
    total_read: usize,
    /// Cells fetched by the most recent read
    last_read: usize,
    /// Mirror of the screen contents up to the last read position
    buffer: Vec<char>,
}

impl ConsoleSession {
    /// Start tracking a freshly filled screen of `size`.
    pub fn new(size: Coord) -> Self {
        Self {
            width: size.x.max(1),
            height: size.y,
            current: Coord::ORIGIN,
            buffer_y: 0,
            last_read_data: String::new(),
            total_read: 0,
            last_read: 0,
            buffer: Vec::new(),
        }
    }

    /// Screen width in cells
    pub fn width(&self) -> usize {
        self.width
    }

    /// Position the next read starts from
    pub fn read_position(&self) -> Coord {
        self.current
    }

    fn offset(&self, at: Coord) -> usize {
        at.x + at.y * self.width
    }

    fn coord(&self, offset: usize) -> Coord {
        Coord::new(offset % self.width, offset / self.width)
    }

    /// Return the text the target produced since the previous call.
    pub fn read_to_cursor<S: ScreenBuffer + ?Sized>(&mut self, screen: &S) -> io::Result<String> {
        let cursor = screen.cursor()?;
        let same_y = cursor.y == self.current.y;
        let same_pos = same_y && cursor.x == self.current.x;

        // Unless the last read ended on a line break, re-read from the start
        // of the current line so rewrites of it are noticed.
        let reread = same_y || !self.last_read_data.ends_with("\r\n");
        if reread {
            self.total_read = self.total_read.saturating_sub(self.last_read);
            self.current = Coord::new(0, self.buffer_y);
        }

        let raw = self.read_range(screen, self.current, cursor)?;
        let mut text = self.parse(&raw, self.last_read);

        let rows = raw.chunks(self.width).collect::<Vec<_>>();
        if let Some(i) = rows
            .iter()
            .rev()
            .position(|row| row.last() == Some(&FILL_CHAR))
        {
            self.buffer_y += rows.len() - i;
        }

        trace!(?cursor, read_from = ?self.current, raw = raw.len(), "screen read");

        if same_pos && self.last_read_data == text {
            text.clear();
        }

        if !text.is_empty() {
            self.last_read_data = text.clone();
            let pos = self.offset(self.current);
            if reread {
                let known = self.buffer.get(pos..).unwrap_or(&[]);
                if raw.starts_with(known) {
                    let fresh = &raw[known.len()..];
                    text = self.parse(fresh, fresh.len());
                } else {
                    text.insert(0, '\r');
                }
            }
            self.buffer.resize(pos, FILL_CHAR);
            self.buffer.extend_from_slice(&raw);
        }

        self.current = cursor;
        Ok(text)
    }

    /// Move the current partial row to the top of the screen and clear the
    /// rest, so the target never reaches the bottom of the buffer.
    ///
    /// The target must be suspended and all output drained with
    /// [`read_to_cursor`](Self::read_to_cursor) first.
    pub fn compact<S: ScreenBuffer + ?Sized>(&mut self, screen: &mut S) -> io::Result<()> {
        let cursor = screen.cursor()?;
        let partial = screen.read_cells(Coord::new(0, cursor.y), cursor.x)?;

        screen.fill_cells(FILL_CHAR, self.width * self.height, Coord::ORIGIN)?;
        screen.write_cells(&partial, Coord::ORIGIN)?;
        let top = Coord::new(cursor.x, 0);
        screen.set_cursor(top)?;

        self.buffer = partial;
        self.current = top;
        self.buffer_y = 0;
        self.total_read = cursor.x;
        self.last_read = cursor.x;
        trace!(from_row = cursor.y, "screen compacted");
        Ok(())
    }

    fn read_range<S: ScreenBuffer + ?Sized>(
        &mut self,
        screen: &S,
        start: Coord,
        end: Coord,
    ) -> io::Result<Vec<char>> {
        self.last_read = 0;
        let mut start_off = self.offset(start);
        let end_off = self.offset(end);
        let mut cells = Vec::with_capacity(end_off.saturating_sub(start_off));

        while start_off < end_off {
            let len = (end_off - start_off).min(MAX_READ_CELLS);
            let chunk = screen.read_cells(self.coord(start_off), len)?;
            self.last_read += chunk.len();
            self.total_read += chunk.len();
            cells.extend(chunk);
            start_off += len;
        }

        Ok(cells)
    }

    /// Drop fill characters, turning those that end a row into `"\r\n"`.
    /// `cells` are the last `last_read` cells read.
    fn parse(&self, cells: &[char], last_read: usize) -> String {
        let base = self.total_read.saturating_sub(last_read);
        let mut text = String::with_capacity(cells.len());
        for (i, &c) in cells.iter().enumerate() {
            if c != FILL_CHAR {
                text.push(c);
            } else if (base + i + 1) % self.width == 0 {
                text.push_str("\r\n");
            }
        }
        text
    }
}

/// In-memory screen used by the capture tests.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct VirtualScreen {
    width: usize,
    height: usize,
    cells: Vec<char>,
    cursor: Coord,
}

#[cfg(test)]
impl VirtualScreen {
    pub(crate) fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![FILL_CHAR; width * height],
            cursor: Coord::ORIGIN,
        }
    }

    /// Write like a console program would: `\r` returns to column 0, `\n`
    /// moves down a row, and text wraps at the right edge.
    pub(crate) fn print(&mut self, text: &str) {
        for c in text.chars() {
            match c {
                '\r' => self.cursor.x = 0,
                '\n' => self.cursor.y += 1,
                c => {
                    let at = self.cursor.x + self.cursor.y * self.width;
                    self.cells[at] = c;
                    self.cursor.x += 1;
                    if self.cursor.x == self.width {
                        self.cursor.x = 0;
                        self.cursor.y += 1;
                    }
                }
            }
        }
        assert!(self.cursor.y < self.height, "virtual screen overflowed");
    }

    pub(crate) fn row(&self, y: usize) -> String {
        self.cells[y * self.width..(y + 1) * self.width]
            .iter()
            .filter(|&&c| c != FILL_CHAR)
            .collect()
    }
}

#[cfg(test)]
impl ScreenBuffer for VirtualScreen {
    fn size(&self) -> io::Result<Coord> {
        Ok(Coord::new(self.width, self.height))
    }

    fn cursor(&self) -> io::Result<Coord> {
        Ok(self.cursor)
    }

    fn set_cursor(&mut self, at: Coord) -> io::Result<()> {
        self.cursor = at;
        Ok(())
    }

    fn read_cells(&self, from: Coord, len: usize) -> io::Result<Vec<char>> {
        let start = from.x + from.y * self.width;
        let end = (start + len).min(self.cells.len());
        Ok(self.cells[start.min(end)..end].to_vec())
    }

    fn write_cells(&mut self, cells: &[char], at: Coord) -> io::Result<()> {
        let start = at.x + at.y * self.width;
        for (i, &c) in cells.iter().enumerate() {
            if let Some(cell) = self.cells.get_mut(start + i) {
                *cell = c;
            }
        }
        Ok(())
    }

    fn fill_cells(&mut self, ch: char, len: usize, at: Coord) -> io::Result<()> {
        let start = at.x + at.y * self.width;
        let end = (start + len).min(self.cells.len());
        self.cells[start.min(end)..end].fill(ch);
        Ok(())
    }
}
