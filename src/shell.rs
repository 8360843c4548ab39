//! Running the shell commands a layout refers to.

use std::io::Read;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

const SHELL_METACHARS: [char; 7] = ['$', '|', '&', ';', '`', '>', '<'];

const FALSY: [&str; 5] = ["0", "false", "off", "no", "disabled"];

/// Run `cmd` and return its trimmed stdout. Any failure, including the
/// timeout, yields an empty string.
pub fn run_capture(cmd: &str, timeout: Duration) -> String {
    let cmd = cmd.trim();
    if cmd.is_empty() {
        return String::new();
    }

    let mut command = build_command(cmd);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0);

    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            debug!("failed to spawn '{}': {}", cmd, e);
            return String::new();
        }
    };
    let Some(mut stdout) = child.stdout.take() else {
        kill_group(&mut child);
        return String::new();
    };

    let deadline = Instant::now() + timeout;
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stdout.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });

    let out = match rx.recv_timeout(timeout) {
        Ok(buf) => buf,
        Err(_) => {
            debug!("command timed out after {:?}: {}", timeout, cmd);
            kill_group(&mut child);
            return String::new();
        }
    };

    // stdout is closed; wait for the exit status without passing the deadline
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    debug!("'{}' exited with {}", cmd, status);
                }
                break;
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    kill_group(&mut child);
                    return String::new();
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                debug!("try_wait failed for '{}': {}", cmd, e);
                break;
            }
        }
    }

    String::from_utf8_lossy(&out).trim().to_string()
}

fn build_command(cmd: &str) -> Command {
    if !cmd.contains(SHELL_METACHARS) {
        if let Some(words) = shlex::split(cmd) {
            if let Some((program, args)) = words.split_first() {
                let mut c = Command::new(program);
                c.args(args);
                return c;
            }
        }
    }
    let mut c = Command::new("sh");
    c.arg("-c").arg(cmd);
    c
}

fn kill_group(child: &mut Child) {
    // the child leads its own group, so its pid is the group id
    let pgid = child.id() as libc::pid_t;
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
    let _ = child.wait();
}

/// Run an action in the background. The output is only logged.
pub fn spawn_action(cmd: &str, timeout: Duration) {
    let cmd = cmd.trim().to_string();
    if cmd.is_empty() {
        return;
    }
    debug!("action: {}", cmd);
    let spawned = std::thread::Builder::new()
        .name("action".into())
        .spawn(move || {
            let out = run_capture(&cmd, timeout);
            if !out.is_empty() {
                debug!("action '{}' printed: {}", cmd, out);
            }
        });
    if let Err(e) = spawned {
        warn!("could not start action thread: {}", e);
    }
}

/// `${...}` covering the whole trimmed string.
pub fn is_command(s: &str) -> bool {
    let s = s.trim();
    s.len() > 3 && s.starts_with("${") && s.ends_with('}')
}

pub fn command_of(s: &str) -> String {
    let s = s.trim();
    if is_command(s) {
        s[2..s.len() - 1].trim().to_string()
    } else {
        String::new()
    }
}

/// Byte index of the `}` closing the `${` at `open`, counting nested braces.
pub fn matching_brace(s: &str, open: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 1usize;
    let mut i = open + 2;
    while i < bytes.len() {
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Replace every `${cmd}` in `s` with `runner(cmd)`. An unmatched `${` is
/// kept verbatim.
pub fn expand_with<F>(s: &str, mut runner: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        match matching_brace(rest, start) {
            Some(end) => {
                out.push_str(&runner(rest[start + 2..end].trim()));
                rest = &rest[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = &rest[start + 2..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn expand(s: &str, timeout: Duration) -> String {
    expand_with(s, |cmd| run_capture(cmd, timeout))
}

pub fn is_truthy(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes" | "enabled"
    )
}

/// Truth of a resolved `if` attribute.
pub fn condition_holds(s: &str) -> bool {
    if is_truthy(s) {
        return true;
    }
    let v = s.trim().to_ascii_lowercase();
    !v.is_empty() && !FALSY.contains(&v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn captures_and_trims_stdout() {
        assert_eq!(run_capture("echo '  hello  '", DEFAULT_TIMEOUT), "hello");
        assert_eq!(run_capture("printf 'a b' | tr a-z A-Z", DEFAULT_TIMEOUT), "A B");
        assert_eq!(run_capture("   ", DEFAULT_TIMEOUT), "");
    }

    #[test]
    fn stderr_and_failures_are_silent() {
        assert_eq!(run_capture("ls /definitely/not/here", DEFAULT_TIMEOUT), "");
        assert_eq!(run_capture("no-such-binary-for-tests", DEFAULT_TIMEOUT), "");
        assert_eq!(run_capture("echo partial; exit 3", DEFAULT_TIMEOUT), "partial");
    }

    #[test]
    fn timeout_kills_the_process_group() {
        let started = Instant::now();
        let out = run_capture("echo early; sleep 5", Duration::from_millis(300));
        assert_eq!(out, "");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn plain_commands_skip_the_shell() {
        let args = |c: &Command| -> Vec<String> {
            c.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
        };
        let c = build_command(r#"batocera-settings-set "global.name" 'a b' c\ d"#);
        assert_eq!(c.get_program(), "batocera-settings-set");
        assert_eq!(args(&c), vec!["global.name", "a b", "c d"]);

        let c = build_command("cat /tmp/x | wc -l");
        assert_eq!(c.get_program(), "sh");
        assert_eq!(args(&c), vec!["-c", "cat /tmp/x | wc -l"]);

        // an open quote is left for sh to report
        let c = build_command("echo 'open");
        assert_eq!(c.get_program(), "sh");
    }

    #[test]
    fn command_detection() {
        assert!(is_command(" ${date +%H:%M} "));
        assert_eq!(command_of("${ date +%H:%M }"), "date +%H:%M");
        assert!(!is_command("Volume ${x}%"));
        assert!(!is_command("${}"));
        assert_eq!(command_of("plain"), "");
    }

    #[test]
    fn expansion_replaces_each_substitution() {
        let mut seen = Vec::new();
        let out = expand_with("Vol ${get vol}% / ${awk '{print $1}' f}", |c| {
            seen.push(c.to_string());
            "X".to_string()
        });
        assert_eq!(out, "Vol X% / X");
        assert_eq!(seen, vec!["get vol", "awk '{print $1}' f"]);
    }

    #[test]
    fn unmatched_substitution_is_kept() {
        assert_eq!(expand_with("a ${b", |_| "X".into()), "a ${b");
        assert_eq!(expand_with("${ok} ${bad", |_| "1".into()), "1 ${bad");
        assert_eq!(expand_with("no commands", |_| "X".into()), "no commands");
    }

    #[test]
    fn expand_runs_commands() {
        assert_eq!(expand("[${echo 42}]", DEFAULT_TIMEOUT), "[42]");
    }

    #[test]
    fn truthiness() {
        for v in ["1", "true", " ON ", "Yes", "enabled"] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "", "nope", "disabled"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn conditions() {
        assert!(condition_holds("yes"));
        assert!(condition_holds("/dev/input/js0"));
        for v in ["", "  ", "0", "False", "off", "no", "disabled"] {
            assert!(!condition_holds(v), "{v:?}");
        }
    }
}
