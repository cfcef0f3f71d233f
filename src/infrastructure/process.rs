//! Process group control for simulator subprocesses.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;

/// Send SIGKILL to every process in the group led by `pid`.
///
/// The simulator runs `make`, which forks compilers and the simulator binary
/// itself, so killing only the direct child would leave orphans behind.
pub fn kill_process_group(pid: u32) -> nix::Result<()> {
    let raw = i32::try_from(pid).map_err(|_| nix::errno::Errno::ESRCH)?;
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // Already gone
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        other => other,
    }
}
