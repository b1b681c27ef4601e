use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{Context, Result, bail};
use deku::ctx::Endian;
use log::{debug, trace, warn};
use zmm::read::{Addr, MemoryReader, ReadError};

use crate::mi::{self, MIResponse, parse_mi_response};

/// Everything gdb sent back for one MI command: the result record's
/// key/value payload plus any console lines that streamed out before it.
#[derive(Debug, Default)]
pub struct ExecOutcome {
    pub status: String,
    pub kv: HashMap<String, String>,
    pub console: Vec<String>,
}

impl ExecOutcome {
    pub fn error_msg(&self) -> &str {
        self.kv.get("msg").map_or("unknown error", |msg| msg.as_str())
    }
}

/// Synchronous MI session with a gdb process or a remote MI stream.
///
/// Commands go down `stdin` one at a time, and every call drains the
/// stream until the matching result record arrives, so responses never
/// interleave. Async and notify records emitted in between are skipped.
pub struct GdbSession {
    stdin: Box<dyn Write + Send>,
    reader: BufReader<Box<dyn Read + Send>>,
    child: Option<Child>,
    endian: Endian,
    ptr_len: usize,
}

impl GdbSession {
    /// Spawn a local gdb, optionally loading an executable and core dump.
    pub fn spawn(gdb_path: Option<&str>, exe: Option<&Path>, core: Option<&Path>) -> Result<Self> {
        let mut command = Command::new(gdb_path.unwrap_or("gdb"));
        command.args(["--interpreter=mi2", "--quiet", "-nx"]);
        if let Some(exe) = exe {
            command.arg(exe);
        }
        if let Some(core) = core {
            command.arg(core);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to start gdb, is it installed?")?;

        let stdin = child.stdin.take().context("gdb stdin was not piped")?;
        let stdout = child.stdout.take().context("gdb stdout was not piped")?;
        Ok(Self {
            stdin: Box::new(stdin),
            reader: BufReader::new(Box::new(stdout) as Box<dyn Read + Send>),
            child: Some(child),
            endian: Endian::Little,
            ptr_len: 8,
        })
    }

    /// Connect to a gdb already running behind a TCP socket
    ///
    /// `mkfifo gdb_pipe; cat gdb_pipe | gdb --interpreter=mi2 | nc -l -p 12345 > gdb_pipe`
    pub fn connect(remote: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(remote)
            .with_context(|| format!("failed to connect to gdb at {remote}"))?;
        let writer = stream.try_clone().context("failed to clone gdb stream")?;
        Ok(Self {
            stdin: Box::new(writer),
            reader: BufReader::new(Box::new(stream) as Box<dyn Read + Send>),
            child: None,
            endian: Endian::Little,
            ptr_len: 8,
        })
    }

    /// Send one MI command and collect records until its result arrives.
    pub fn execute(&mut self, cmd: &str) -> Result<ExecOutcome> {
        debug!("writing {cmd}");
        writeln!(self.stdin, "{cmd}").context("failed to write to gdb")?;
        self.stdin.flush().context("failed to flush gdb stdin")?;

        let mut console = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.reader.read_line(&mut line).context("failed to read from gdb")?;
            if n == 0 {
                bail!("gdb closed the stream");
            }
            let record = line.trim_end();
            if record.is_empty() {
                continue;
            }
            trace!("{record:?}");
            match parse_mi_response(record) {
                MIResponse::ExecResult(status, kv) => {
                    return Ok(ExecOutcome { status, kv, console });
                }
                MIResponse::StreamOutput(_, text) => console.push(text),
                MIResponse::AsyncRecord(..) | MIResponse::Notify(..) | MIResponse::Unknown(_) => {}
            }
        }
    }

    /// Like [`Self::execute`], but treat an `^error` result as a failure.
    pub fn execute_done(&mut self, cmd: &str) -> Result<ExecOutcome> {
        let outcome = self.execute(cmd)?;
        if outcome.status == "error" {
            bail!("gdb: {} ({cmd})", outcome.error_msg());
        }
        Ok(outcome)
    }

    pub fn attach(&mut self, pid: i32) -> Result<()> {
        self.execute_done(&mi::target_attach(pid))
            .with_context(|| format!("failed to attach to pid {pid}"))?;
        Ok(())
    }

    /// Best effort detach so an attached process keeps running.
    pub fn detach(&mut self) {
        if let Err(err) = self.execute("-target-detach") {
            warn!("detach failed: {err}");
        }
    }

    /// Ask gdb for the target byte order. Assumes little on any failure.
    pub fn probe_endian(&mut self) -> Endian {
        match self.execute(&mi::interpreter_exec_console("show endian")) {
            Ok(outcome) => {
                for text in &outcome.console {
                    if text.contains("little endian") {
                        self.endian = Endian::Little;
                        return self.endian;
                    }
                    if text.contains("big endian") {
                        self.endian = Endian::Big;
                        return self.endian;
                    }
                }
                warn!("could not parse endianness from gdb, assuming little");
            }
            Err(err) => warn!("endianness probe failed: {err}, assuming little"),
        }
        self.endian = Endian::Little;
        self.endian
    }

    /// Ask gdb for the target pointer width. Assumes 64-bit on any failure.
    pub fn probe_ptr_len(&mut self) -> usize {
        match self.eval_integer("sizeof(long)") {
            Ok(4) => self.ptr_len = 4,
            Ok(8) => self.ptr_len = 8,
            Ok(other) => warn!("unexpected sizeof(long) = {other}, assuming 64-bit"),
            Err(err) => warn!("pointer width probe failed: {err}, assuming 64-bit"),
        }
        self.ptr_len
    }

    pub fn set_ptr_len(&mut self, ptr_len: usize) {
        self.ptr_len = ptr_len;
    }

    /// Evaluate an expression in the target and parse the integer result.
    pub fn eval_integer(&mut self, expr: &str) -> Result<u64> {
        let outcome = self.execute_done(&mi::data_evaluate_expression(expr))?;
        let value = outcome
            .kv
            .get("value")
            .with_context(|| format!("gdb returned no value for `{expr}`"))?;
        mi::parse_value_integer(value)
            .with_context(|| format!("unparseable value for `{expr}`: {value}"))
    }
}

impl Drop for GdbSession {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "-gdb-exit");
        let _ = self.stdin.flush();
        if let Some(mut child) = self.child.take() {
            let _ = child.wait();
        }
    }
}

impl MemoryReader for GdbSession {
    fn read(&mut self, addr: Addr, buf: &mut [u8]) -> Result<(), ReadError> {
        if buf.is_empty() {
            return Ok(());
        }
        let fail = ReadError { addr, len: buf.len() };
        let outcome = match self.execute(&mi::data_read_memory_bytes(addr, buf.len() as u64)) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("memory read transport failure: {err}");
                return Err(fail);
            }
        };
        if outcome.status != "done" {
            trace!("gdb refused read at {addr:#x}: {}", outcome.error_msg());
            return Err(fail);
        }
        let Some(memory) = outcome.kv.get("memory") else {
            return Err(fail);
        };
        let Some((begin, bytes)) = mi::parse_memory_contents(memory) else {
            return Err(fail);
        };
        // gdb reports the range it actually read; trust begin, not addr
        let Some(offset) = addr.checked_sub(begin) else {
            return Err(fail);
        };
        if offset.saturating_add(buf.len() as u64) > bytes.len() as u64 {
            return Err(fail);
        }
        let offset = offset as usize;
        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn endian(&self) -> Endian {
        self.endian
    }

    fn ptr_len(&self) -> usize {
        self.ptr_len
    }
}

/// Session whose reader replays a canned MI transcript. Test use only.
#[cfg(test)]
pub(crate) fn fake_session(transcript: &str) -> GdbSession {
    GdbSession {
        stdin: Box::new(Vec::new()),
        reader: BufReader::new(Box::new(std::io::Cursor::new(transcript.as_bytes().to_vec()))
            as Box<dyn Read + Send>),
        child: None,
        endian: Endian::Little,
        ptr_len: 8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_over(input: &str) -> GdbSession {
        fake_session(input)
    }

    #[test]
    fn test_execute_collects_console_and_result() {
        let mut session = session_over(concat!(
            "~\"The target endianness is set automatically (currently little endian).\\n\"\n",
            "=thread-group-added,id=\"i1\"\n",
            "^done\n",
            "(gdb) \n",
        ));
        let outcome = session.execute("-interpreter-exec console \"show endian\"").unwrap();
        assert_eq!(outcome.status, "done");
        assert_eq!(outcome.console.len(), 1);
        assert!(outcome.console[0].contains("little endian"));
    }

    #[test]
    fn test_probe_endian_reads_console() {
        let mut session = session_over(concat!(
            "~\"The target is assumed to be big endian\\n\"\n",
            "^done\n",
        ));
        assert_eq!(session.probe_endian(), Endian::Big);
        assert_eq!(session.endian(), Endian::Big);
    }

    #[test]
    fn test_execute_done_surfaces_gdb_errors() {
        let mut session = session_over("^error,msg=\"No symbol table is loaded.\"\n");
        let err = session.execute_done("-data-evaluate-expression bogus").unwrap_err();
        assert!(err.to_string().contains("No symbol table"));
    }

    #[test]
    fn test_closed_stream_is_an_error() {
        let mut session = session_over("");
        assert!(session.execute("-gdb-version").is_err());
    }

    #[test]
    fn test_eval_integer_strips_cast() {
        let mut session = session_over("^done,value=\"(unsigned long) 312\"\n");
        assert_eq!(session.eval_integer("anything").unwrap(), 312);
    }

    #[test]
    fn test_read_fills_buffer_from_memory_payload() {
        let mut session = session_over(concat!(
            "^done,memory=[{begin=\"0x1000\",offset=\"0x0\",end=\"0x1008\",",
            "contents=\"0011223344556677\"}]\n",
        ));
        let mut buf = [0u8; 8];
        session.read(0x1000, &mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
    }

    #[test]
    fn test_read_honors_reported_begin() {
        // gdb may round the range; the requested addr sits inside it
        let mut session = session_over(concat!(
            "^done,memory=[{begin=\"0x1000\",offset=\"0x0\",end=\"0x1008\",",
            "contents=\"0011223344556677\"}]\n",
        ));
        let mut buf = [0u8; 4];
        session.read(0x1004, &mut buf).unwrap();
        assert_eq!(buf, [0x44, 0x55, 0x66, 0x77]);
    }

    #[test]
    fn test_read_error_status_is_a_read_error() {
        let mut session =
            session_over("^error,msg=\"Cannot access memory at address 0xdead\"\n");
        let mut buf = [0u8; 4];
        let err = session.read(0xdead, &mut buf).unwrap_err();
        assert_eq!(err, ReadError { addr: 0xdead, len: 4 });
    }

    #[test]
    fn test_read_short_payload_is_a_read_error() {
        let mut session = session_over(concat!(
            "^done,memory=[{begin=\"0x1000\",offset=\"0x0\",end=\"0x1002\",",
            "contents=\"0011\"}]\n",
        ));
        let mut buf = [0u8; 4];
        assert!(session.read(0x1000, &mut buf).is_err());
    }
}
