//! Win32 console backend

use super::screen::{Coord, ScreenBuffer, FILL_CHAR};
use super::{command_line, Console};
use std::io;
use std::mem;
use std::ptr;
use tracing::{debug, info, warn};
use windows::core::{w, PCWSTR, PWSTR};
use windows::Win32::Foundation::{
    CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, STILL_ACTIVE,
};
use windows::Win32::Security::SECURITY_ATTRIBUTES;
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows::Win32::System::Console::{
    FillConsoleOutputCharacterW, GenerateConsoleCtrlEvent, GetConsoleScreenBufferInfo,
    GetConsoleWindow, GetNumberOfConsoleInputEvents, ReadConsoleOutputCharacterW,
    SetConsoleCtrlHandler, SetConsoleCursorPosition, SetConsoleOutputCP,
    SetConsoleScreenBufferSize, SetConsoleWindowInfo, WriteConsoleInputW,
    WriteConsoleOutputCharacterW, CONSOLE_SCREEN_BUFFER_INFO, COORD, CTRL_C_EVENT, INPUT_RECORD,
    INPUT_RECORD_0, KEY_EVENT, KEY_EVENT_RECORD, KEY_EVENT_RECORD_0, SMALL_RECT,
};
use windows::Win32::System::Threading::{
    CreateProcessW, GetExitCodeProcess, ResumeThread, SuspendThread, TerminateProcess,
    PROCESS_CREATION_FLAGS, PROCESS_INFORMATION, STARTF_USESTDHANDLES, STARTUPINFOW,
};
use windows::Win32::UI::WindowsAndMessaging::{ShowWindow, SW_HIDE, SW_SHOW};

/// Visible window geometry
pub const WINDOW_SIZE: Coord = Coord::new(80, 25);

/// Screen buffer geometry
pub const BUFFER_SIZE: Coord = Coord::new(80, 16000);

/// How the console is prepared before the target starts.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSetup {
    /// Output code page to select
    pub codepage: Option<u32>,
    /// Keep the console window on screen
    pub visible: bool,
}

/// The capture process's own console with one target running in it.
pub struct WinConsole {
    output: HANDLE,
    input: HANDLE,
    process: PROCESS_INFORMATION,
    exit: Option<u32>,
}

// Safety: the handles are owned by this value and only used through &mut self
// or for reads the console serializes itself.
unsafe impl Send for WinConsole {}

impl WinConsole {
    /// Prepare the console and start `command` (program followed by its
    /// arguments) attached to it.
    pub fn launch(setup: &ConsoleSetup, command: &[String]) -> io::Result<Self> {
        if let Some(cp) = setup.codepage {
            info!(codepage = cp, "setting console output code page");
            if let Err(e) = unsafe { SetConsoleOutputCP(cp) } {
                warn!(codepage = cp, error = %e, "failed to set code page");
            }
        }

        let inherit = SECURITY_ATTRIBUTES {
            nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: ptr::null_mut(),
            bInheritHandle: true.into(),
        };
        let output = open_console(w!("CONOUT$"), &inherit)?;
        let input = open_console(w!("CONIN$"), &inherit)?;

        let mut console = Self {
            output,
            input,
            process: PROCESS_INFORMATION::default(),
            exit: None,
        };
        console.set_visible(setup.visible)?;
        console.prepare_screen()?;
        console.spawn_target(command)?;

        // Ctrl+C requests are generated on the whole console; only the
        // target should react to them.
        unsafe { SetConsoleCtrlHandler(None, true) }?;
        Ok(console)
    }

    /// Process id of the target
    pub fn target_pid(&self) -> u32 {
        self.process.dwProcessId
    }

    fn prepare_screen(&mut self) -> io::Result<()> {
        let window = SMALL_RECT {
            Left: 0,
            Top: 0,
            Right: WINDOW_SIZE.x as i16 - 1,
            Bottom: WINDOW_SIZE.y as i16 - 1,
        };
        unsafe {
            SetConsoleWindowInfo(self.output, true, &window)?;
            SetConsoleScreenBufferSize(self.output, to_coord(BUFFER_SIZE))?;
        }
        let size = self.size()?;
        self.fill_cells(FILL_CHAR, size.x * size.y, Coord::ORIGIN)?;
        self.set_cursor(Coord::ORIGIN)?;
        debug!(width = size.x, height = size.y, "screen buffer prepared");
        Ok(())
    }

    fn spawn_target(&mut self, command: &[String]) -> io::Result<()> {
        let line = command_line(command);
        info!(command = %line, "launching target");
        let mut wide: Vec<u16> = line.encode_utf16().chain(Some(0)).collect();

        let startup = STARTUPINFOW {
            cb: mem::size_of::<STARTUPINFOW>() as u32,
            dwFlags: STARTF_USESTDHANDLES,
            hStdInput: self.input,
            hStdOutput: self.output,
            hStdError: self.output,
            ..Default::default()
        };

        unsafe {
            CreateProcessW(
                PCWSTR::null(),
                PWSTR(wide.as_mut_ptr()),
                None,
                None,
                true,
                PROCESS_CREATION_FLAGS(0),
                None,
                PCWSTR::null(),
                &startup,
                &mut self.process,
            )?;
        }
        info!(pid = self.process.dwProcessId, "target running");
        Ok(())
    }

    fn screen_info(&self) -> io::Result<CONSOLE_SCREEN_BUFFER_INFO> {
        let mut info = CONSOLE_SCREEN_BUFFER_INFO::default();
        unsafe { GetConsoleScreenBufferInfo(self.output, &mut info) }?;
        Ok(info)
    }
}

fn open_console(name: PCWSTR, inherit: &SECURITY_ATTRIBUTES) -> io::Result<HANDLE> {
    let handle = unsafe {
        CreateFileW(
            name,
            (GENERIC_READ | GENERIC_WRITE).0,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            Some(inherit as *const _),
            OPEN_EXISTING,
            FILE_ATTRIBUTE_NORMAL,
            HANDLE::default(),
        )
    }?;
    Ok(handle)
}

fn to_coord(at: Coord) -> COORD {
    COORD {
        X: at.x as i16,
        Y: at.y as i16,
    }
}

fn from_coord(at: COORD) -> Coord {
    Coord::new(at.X.max(0) as usize, at.Y.max(0) as usize)
}

/// One UTF-16 unit per cell; characters outside the BMP cannot be stored.
fn to_cell(c: char) -> u16 {
    u16::try_from(u32::from(c)).unwrap_or(0xFFFD)
}

fn key_down(unit: u16) -> INPUT_RECORD {
    INPUT_RECORD {
        EventType: KEY_EVENT as u16,
        Event: INPUT_RECORD_0 {
            KeyEvent: KEY_EVENT_RECORD {
                bKeyDown: true.into(),
                wRepeatCount: 1,
                wVirtualKeyCode: 0,
                wVirtualScanCode: 0,
                uChar: KEY_EVENT_RECORD_0 { UnicodeChar: unit },
                dwControlKeyState: 0,
            },
        },
    }
}

impl ScreenBuffer for WinConsole {
    fn size(&self) -> io::Result<Coord> {
        Ok(from_coord(self.screen_info()?.dwSize))
    }

    fn cursor(&self) -> io::Result<Coord> {
        Ok(from_coord(self.screen_info()?.dwCursorPosition))
    }

    fn set_cursor(&mut self, at: Coord) -> io::Result<()> {
        unsafe { SetConsoleCursorPosition(self.output, to_coord(at)) }?;
        Ok(())
    }

    fn read_cells(&self, from: Coord, len: usize) -> io::Result<Vec<char>> {
        let mut units = vec![0u16; len];
        let mut read = 0u32;
        unsafe { ReadConsoleOutputCharacterW(self.output, &mut units, to_coord(from), &mut read) }?;
        units.truncate(read as usize);
        Ok(units
            .into_iter()
            .map(|u| char::from_u32(u32::from(u)).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect())
    }

    fn write_cells(&mut self, cells: &[char], at: Coord) -> io::Result<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let units: Vec<u16> = cells.iter().map(|&c| to_cell(c)).collect();
        let mut written = 0u32;
        unsafe { WriteConsoleOutputCharacterW(self.output, &units, to_coord(at), &mut written) }?;
        Ok(())
    }

    fn fill_cells(&mut self, ch: char, len: usize, at: Coord) -> io::Result<()> {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        let mut written = 0u32;
        unsafe {
            FillConsoleOutputCharacterW(self.output, to_cell(ch), len, to_coord(at), &mut written)
        }?;
        Ok(())
    }
}

impl Console for WinConsole {
    fn write_input(&mut self, text: &str) -> io::Result<()> {
        let records: Vec<INPUT_RECORD> = text.encode_utf16().map(key_down).collect();
        if records.is_empty() {
            return Ok(());
        }
        let mut written = 0u32;
        unsafe { WriteConsoleInputW(self.input, &records, &mut written) }?;
        Ok(())
    }

    fn pending_input(&self) -> io::Result<usize> {
        let mut events = 0u32;
        unsafe { GetNumberOfConsoleInputEvents(self.input, &mut events) }?;
        Ok(events as usize)
    }

    fn exit_code(&mut self) -> io::Result<Option<u32>> {
        if self.exit.is_none() {
            let mut code = 0u32;
            unsafe { GetExitCodeProcess(self.process.hProcess, &mut code) }?;
            if code != STILL_ACTIVE.0 as u32 {
                self.exit = Some(code);
            }
        }
        Ok(self.exit)
    }

    fn suspend(&mut self) -> io::Result<()> {
        if unsafe { SuspendThread(self.process.hThread) } == u32::MAX {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn resume(&mut self) -> io::Result<()> {
        if unsafe { ResumeThread(self.process.hThread) } == u32::MAX {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn interrupt(&mut self) -> io::Result<()> {
        unsafe { GenerateConsoleCtrlEvent(CTRL_C_EVENT, 0) }?;
        Ok(())
    }

    fn terminate(&mut self) -> io::Result<()> {
        if self.exit_code()?.is_some() {
            return Ok(());
        }
        info!(pid = self.target_pid(), "terminating target");
        unsafe { TerminateProcess(self.process.hProcess, 1) }?;
        Ok(())
    }

    fn set_visible(&mut self, visible: bool) -> io::Result<()> {
        let window = unsafe { GetConsoleWindow() };
        if window.is_invalid() {
            return Ok(());
        }
        let was_visible = unsafe { ShowWindow(window, if visible { SW_SHOW } else { SW_HIDE }) };
        debug!(visible, was_visible = was_visible.as_bool(), "console window toggled");
        Ok(())
    }
}

impl Drop for WinConsole {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.process.hThread);
            let _ = CloseHandle(self.process.hProcess);
            let _ = CloseHandle(self.input);
            let _ = CloseHandle(self.output);
        }
    }
}
