//! Win32 implementation of [`Platform`].

use std::time::Duration;

use windows::core::{Interface, GUID, HRESULT};
use windows::Win32::Foundation::{CloseHandle, BOOL, HANDLE, HWND, LPARAM, WPARAM};
use windows::Win32::Media::Audio::{
  eConsole, eRender, AudioSessionStateExpired, IAudioSessionControl2, IAudioSessionEnumerator,
  IAudioSessionManager2, IMMDeviceEnumerator, ISimpleAudioVolume, MMDeviceEnumerator,
};
use windows::Win32::System::Com::{
  CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
};
use windows::Win32::System::Threading::{
  OpenProcess, TerminateProcess, PROCESS_ACCESS_RIGHTS, PROCESS_QUERY_INFORMATION,
  PROCESS_SYNCHRONIZE, PROCESS_TERMINATE,
};
use windows::Win32::UI::Input::KeyboardAndMouse::{
  keybd_event, KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP,
};
use windows::Win32::UI::WindowsAndMessaging::{
  EnumWindows, GetClassNameW, GetWindow, GetWindowPlacement, GetWindowTextW,
  GetWindowThreadProcessId, IsWindowVisible, PostMessageW, SendMessageW, SetForegroundWindow,
  ShowWindow, WaitForInputIdle, GW_OWNER, SHOW_WINDOW_CMD, SW_HIDE, SW_MINIMIZE,
  SW_RESTORE, SW_SHOW, SW_SHOWMAXIMIZED, SW_SHOWMINIMIZED, SW_SHOWNORMAL, WINDOWPLACEMENT,
  WM_APPCOMMAND, WM_CLOSE,
};

use super::procs::ProcessTable;
use super::{
  AppCommand, AppVolume, MediaKey, Platform, PlatformError, ProcessInfo, ShowCommand,
  WindowHandle, WindowPlacement,
};

/// `WaitForInputIdle` returned because the wait elapsed.
const WAIT_TIMEOUT: u32 = 0x0000_0102;
/// Session has no owning process (`AUDCLNT_S_NO_CURRENT_PROCESS`).
const AUDCLNT_S_NO_CURRENT_PROCESS: HRESULT = HRESULT(0x0889_0008_u32 as i32);

pub struct WindowsPlatform {
  table: ProcessTable,
}

impl WindowsPlatform {
  pub fn new() -> Self {
    Self {
      table: ProcessTable::new(),
    }
  }
}

fn hwnd(window: WindowHandle) -> HWND {
  HWND(window.0 as *mut _)
}

/// Owned process handle, closed on drop.
struct ProcessHandle(HANDLE);

impl ProcessHandle {
  fn open(pid: u32, access: PROCESS_ACCESS_RIGHTS) -> Option<Self> {
    match unsafe { OpenProcess(access, false, pid) } {
      Ok(handle) if !handle.is_invalid() => Some(Self(handle)),
      Ok(_) => None,
      Err(e) => {
        log::debug!("OpenProcess({}) failed: {}", pid, e);
        None
      }
    }
  }
}

impl Drop for ProcessHandle {
  fn drop(&mut self) {
    let _ = unsafe { CloseHandle(self.0) };
  }
}

/// COM apartment for the current call, uninitialized on drop.
struct ComApartment;

impl ComApartment {
  fn enter() -> Result<Self, PlatformError> {
    unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) }
      .ok()
      .map_err(|e| PlatformError::Os(format!("CoInitializeEx: {}", e)))?;
    Ok(Self)
  }
}

impl Drop for ComApartment {
  fn drop(&mut self) {
    unsafe { CoUninitialize() };
  }
}

unsafe extern "system" fn collect_window(window: HWND, lparam: LPARAM) -> BOOL {
  let windows = &mut *(lparam.0 as *mut Vec<(u32, HWND)>);
  let mut pid = 0u32;
  GetWindowThreadProcessId(window, Some(&mut pid));
  windows.push((pid, window));
  BOOL(1)
}

/// Every top-level window on the desktop with its owning pid, in Z order.
fn all_top_level_windows() -> Vec<(u32, HWND)> {
  let mut windows: Vec<(u32, HWND)> = Vec::new();
  let result = unsafe {
    EnumWindows(
      Some(collect_window),
      LPARAM(&mut windows as *mut Vec<(u32, HWND)> as isize),
    )
  };
  if let Err(e) = result {
    log::debug!("EnumWindows failed: {}", e);
    return Vec::new();
  }
  windows
}

/// Visible and unowned: what the OS treats as a process's main window.
fn is_primary(window: HWND) -> bool {
  let visible = unsafe { IsWindowVisible(window) }.as_bool();
  let owned = unsafe { GetWindow(window, GW_OWNER) }.is_ok_and(|owner| !owner.is_invalid());
  visible && !owned
}

fn read_wide(len: i32, buf: &[u16]) -> Option<String> {
  if len <= 0 {
    return None;
  }
  Some(String::from_utf16_lossy(&buf[..len as usize]))
}

/// Every active audio session control belonging to `pid`.
fn sessions_for(pid: u32) -> Result<Vec<ISimpleAudioVolume>, PlatformError> {
  let os = |e: windows::core::Error| PlatformError::Os(e.to_string());

  let mut found = Vec::new();
  unsafe {
    let enumerator: IMMDeviceEnumerator =
      CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(os)?;
    let device = enumerator
      .GetDefaultAudioEndpoint(eRender, eConsole)
      .map_err(os)?;
    let manager: IAudioSessionManager2 = device.Activate(CLSCTX_ALL, None).map_err(os)?;
    let sessions: IAudioSessionEnumerator = manager.GetSessionEnumerator().map_err(os)?;
    let count = sessions.GetCount().map_err(os)?;

    for i in 0..count {
      let Ok(control) = sessions.GetSession(i) else {
        continue;
      };
      let Ok(control) = control.cast::<IAudioSessionControl2>() else {
        continue;
      };
      match control.GetProcessId() {
        Ok(session_pid) if session_pid == pid => {
          if control
            .GetState()
            .is_ok_and(|state| state == AudioSessionStateExpired)
          {
            continue;
          }
          if let Ok(volume) = control.cast::<ISimpleAudioVolume>() {
            found.push(volume);
          }
        }
        Ok(_) => {}
        Err(e) if e.code() == AUDCLNT_S_NO_CURRENT_PROCESS => {}
        Err(e) => log::trace!("Audio session {} has no readable pid: {}", i, e),
      }
    }
  }
  Ok(found)
}

impl Platform for WindowsPlatform {
  fn processes(&self, executable: &str) -> Vec<ProcessInfo> {
    let pids = self.table.matching_pids(executable);
    if pids.is_empty() {
      return Vec::new();
    }

    let windows = all_top_level_windows();
    pids
      .into_iter()
      .map(|pid| ProcessInfo {
        pid,
        main_window: windows
          .iter()
          .find(|(owner, window)| *owner == pid && is_primary(*window))
          .map(|(_, window)| WindowHandle(window.0 as isize)),
      })
      .collect()
  }

  fn is_process_alive(&self, pid: u32) -> bool {
    self.table.is_alive(pid)
  }

  fn wait_for_input_idle(&self, pid: u32, timeout: Duration) -> bool {
    let Some(process) = ProcessHandle::open(pid, PROCESS_QUERY_INFORMATION | PROCESS_SYNCHRONIZE)
    else {
      return false;
    };
    let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
    match unsafe { WaitForInputIdle(process.0, millis) } {
      0 => true,
      WAIT_TIMEOUT => false,
      // WAIT_FAILED: console process or no message queue, nothing to wait for.
      _ => true,
    }
  }

  fn terminate(&self, pid: u32) -> Result<(), PlatformError> {
    let process =
      ProcessHandle::open(pid, PROCESS_TERMINATE).ok_or(PlatformError::ProcessNotFound(pid))?;
    unsafe { TerminateProcess(process.0, 1) }.map_err(|e| PlatformError::Os(e.to_string()))
  }

  fn top_level_windows(&self, pid: u32) -> Vec<WindowHandle> {
    all_top_level_windows()
      .into_iter()
      .filter(|(owner, _)| *owner == pid)
      .map(|(_, window)| WindowHandle(window.0 as isize))
      .collect()
  }

  fn window_class(&self, window: WindowHandle) -> Option<String> {
    let mut buf = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd(window), &mut buf) };
    read_wide(len, &buf)
  }

  fn window_title(&self, window: WindowHandle) -> Option<String> {
    let mut buf = [0u16; 512];
    let len = unsafe { GetWindowTextW(hwnd(window), &mut buf) };
    read_wide(len, &buf)
  }

  fn placement(&self, window: WindowHandle) -> WindowPlacement {
    let target = hwnd(window);
    if !unsafe { IsWindowVisible(target) }.as_bool() {
      return WindowPlacement::Hidden;
    }

    let mut placement = WINDOWPLACEMENT {
      length: std::mem::size_of::<WINDOWPLACEMENT>() as u32,
      ..Default::default()
    };
    if unsafe { GetWindowPlacement(target, &mut placement) }.is_err() {
      return WindowPlacement::Unknown;
    }
    match SHOW_WINDOW_CMD(placement.showCmd as i32) {
      SW_SHOWMINIMIZED | SW_MINIMIZE => WindowPlacement::Minimized,
      SW_SHOWMAXIMIZED => WindowPlacement::Maximized,
      SW_SHOWNORMAL | SW_RESTORE | SW_SHOW => WindowPlacement::Normal,
      _ => WindowPlacement::Unknown,
    }
  }

  fn show(&self, window: WindowHandle, command: ShowCommand) -> bool {
    let cmd = match command {
      ShowCommand::Minimize => SW_MINIMIZE,
      ShowCommand::Restore => SW_RESTORE,
      ShowCommand::Hide => SW_HIDE,
      ShowCommand::Show => SW_SHOW,
    };
    // Return value is the previous visibility, not success.
    let _ = unsafe { ShowWindow(hwnd(window), cmd) };
    true
  }

  fn set_foreground(&self, window: WindowHandle) -> bool {
    unsafe { SetForegroundWindow(hwnd(window)) }.as_bool()
  }

  fn close(&self, window: WindowHandle) -> bool {
    unsafe { PostMessageW(Some(hwnd(window)), WM_CLOSE, WPARAM(0), LPARAM(0)) }.is_ok()
  }

  fn send_app_command(&self, window: WindowHandle, command: AppCommand) -> bool {
    let lparam = LPARAM((command.code() as isize) << 16);
    unsafe { SendMessageW(hwnd(window), WM_APPCOMMAND, Some(WPARAM(0)), Some(lparam)) };
    true
  }

  fn send_media_key(&self, key: MediaKey) -> bool {
    let vk = key.virtual_key();
    unsafe {
      keybd_event(vk, 0, KEYEVENTF_EXTENDEDKEY, 0);
      keybd_event(vk, 0, KEYEVENTF_EXTENDEDKEY | KEYEVENTF_KEYUP, 0);
    }
    true
  }

  fn app_volume(&self, pid: u32) -> Result<AppVolume, PlatformError> {
    let _com = ComApartment::enter()?;
    let sessions = sessions_for(pid)?;
    let session = sessions.first().ok_or(PlatformError::NoAudioSession(pid))?;
    unsafe {
      let level = session
        .GetMasterVolume()
        .map_err(|e| PlatformError::Os(e.to_string()))?;
      let muted = session
        .GetMute()
        .map_err(|e| PlatformError::Os(e.to_string()))?
        .as_bool();
      Ok(AppVolume { level, muted })
    }
  }

  fn set_app_volume(
    &self,
    pid: u32,
    level: Option<f32>,
    muted: Option<bool>,
  ) -> Result<(), PlatformError> {
    let _com = ComApartment::enter()?;
    let sessions = sessions_for(pid)?;
    if sessions.is_empty() {
      return Err(PlatformError::NoAudioSession(pid));
    }
    for session in &sessions {
      unsafe {
        if let Some(level) = level {
          session
            .SetMasterVolume(level.clamp(0.0, 1.0), &GUID::zeroed())
            .map_err(|e| PlatformError::Os(e.to_string()))?;
        }
        if let Some(muted) = muted {
          session
            .SetMute(muted, &GUID::zeroed())
            .map_err(|e| PlatformError::Os(e.to_string()))?;
        }
      }
    }
    Ok(())
  }
}
