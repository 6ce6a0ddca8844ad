//! JSON-RPC control surface.
//!
//! Exposes the machine's control surface (run, halt, stepping,
//! breakpoints, memory access, cartridge handling, snapshots) as a
//! JSON-RPC 2.0 server over stdin/stdout, so scripts and agents can drive
//! a headless instance.

use std::io::{self, BufRead, Write};

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use mos_6510::BreakpointTag;

use crate::archive::PrgArchive;
use crate::config::MachineConfig;
use crate::crt::CrtCartridge;
use crate::C64;

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: JsonValue, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }
}

fn param_u64(params: &JsonValue, key: &str) -> Option<u64> {
    params.get(key).and_then(JsonValue::as_u64)
}

fn param_str<'a>(params: &'a JsonValue, key: &str) -> Option<&'a str> {
    params.get(key).and_then(JsonValue::as_str)
}

/// JSON-RPC server wrapping a headless C64.
pub struct McpServer {
    c64: C64,
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl McpServer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            c64: C64::new(MachineConfig::pal()),
        }
    }

    /// Serve requests line by line until stdin closes.
    pub fn run(&mut self) {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: RpcRequest = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    let resp =
                        RpcResponse::error(JsonValue::Null, -32700, format!("parse error: {e}"));
                    let _ = writeln!(stdout, "{}", serde_json::to_string(&resp).unwrap_or_default());
                    let _ = stdout.flush();
                    continue;
                }
            };

            if request.jsonrpc != "2.0" {
                let resp =
                    RpcResponse::error(request.id, -32600, "invalid JSON-RPC version".into());
                let _ = writeln!(stdout, "{}", serde_json::to_string(&resp).unwrap_or_default());
                let _ = stdout.flush();
                continue;
            }

            let response = self.dispatch(&request.method, &request.params, request.id.clone());
            let _ = writeln!(stdout, "{}", serde_json::to_string(&response).unwrap_or_default());
            let _ = stdout.flush();
        }
    }

    fn dispatch(&mut self, method: &str, params: &JsonValue, id: JsonValue) -> RpcResponse {
        match method {
            "load_roms" => self.handle_load_roms(params, id),
            "reset" => {
                self.c64.reset();
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "run" => {
                self.c64.run();
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "halt" => {
                self.c64.halt();
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "run_cycles" => {
                let count = param_u64(params, "count").unwrap_or(1);
                self.c64.execute_cycles(count);
                RpcResponse::success(id, json!({ "cycle": self.c64.cycle() }))
            }
            "run_frames" => {
                let count = param_u64(params, "count").unwrap_or(1);
                for _ in 0..count {
                    self.c64.execute_frame();
                }
                RpcResponse::success(id, json!({ "frame": self.c64.mem.vic.frame() }))
            }
            "step_instruction" => {
                self.c64.step_instruction();
                RpcResponse::success(id, json!({ "disassembly": self.c64.disassemble_pc() }))
            }
            "step_over" => {
                self.c64.step_over();
                RpcResponse::success(id, json!({ "disassembly": self.c64.disassemble_pc() }))
            }
            "cpu_state" => self.handle_cpu_state(id),
            "peek" => {
                let Some(addr) = param_u64(params, "addr") else {
                    return RpcResponse::error(id, -32602, "missing addr".into());
                };
                let value = self.c64.spypeek(addr as u16);
                RpcResponse::success(id, json!({ "value": value }))
            }
            "poke" => {
                let (Some(addr), Some(value)) =
                    (param_u64(params, "addr"), param_u64(params, "value"))
                else {
                    return RpcResponse::error(id, -32602, "missing addr/value".into());
                };
                self.c64.poke(addr as u16, value as u8);
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "set_breakpoint" => {
                let Some(addr) = param_u64(params, "addr") else {
                    return RpcResponse::error(id, -32602, "missing addr".into());
                };
                let tag = if params.get("soft").and_then(JsonValue::as_bool) == Some(true) {
                    BreakpointTag::Soft
                } else {
                    BreakpointTag::Hard
                };
                self.c64.set_breakpoint(addr as u16, tag);
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "delete_breakpoint" => {
                let Some(addr) = param_u64(params, "addr") else {
                    return RpcResponse::error(id, -32602, "missing addr".into());
                };
                self.c64.delete_breakpoint(addr as u16);
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "screenshot" => self.handle_screenshot(id),
            "load_prg" => self.handle_load_prg(params, id),
            "attach_cartridge" => self.handle_attach_cartridge(params, id),
            "detach_cartridge" => {
                self.c64.detach_cartridge();
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "press_button" => {
                let nr = param_u64(params, "button").unwrap_or(1) as usize;
                self.c64.press_cartridge_button(nr);
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "release_button" => {
                let nr = param_u64(params, "button").unwrap_or(1) as usize;
                self.c64.release_cartridge_button(nr);
                RpcResponse::success(id, json!({ "ok": true }))
            }
            "snapshot_save" => {
                self.c64.suspend();
                let bytes = self.c64.save_snapshot().to_bytes();
                self.c64.resume();
                let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                RpcResponse::success(id, json!({ "snapshot": encoded }))
            }
            "snapshot_load" => self.handle_snapshot_load(params, id),
            _ => RpcResponse::error(id, -32601, format!("unknown method: {method}")),
        }
    }

    fn handle_load_roms(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let Some(dir) = param_str(params, "dir") else {
            return RpcResponse::error(id, -32602, "missing dir".into());
        };
        type RomLoader = fn(&mut C64, &[u8]) -> Result<(), &'static str>;
        for (name, loader) in [
            ("basic.bin", C64::load_basic_rom as RomLoader),
            ("chargen.bin", C64::load_character_rom as RomLoader),
            ("kernal.bin", C64::load_kernal_rom as RomLoader),
        ] {
            let path = format!("{dir}/{name}");
            match std::fs::read(&path) {
                Ok(data) => {
                    if let Err(e) = loader(&mut self.c64, &data) {
                        return RpcResponse::error(id, -32000, format!("{path}: {e}"));
                    }
                }
                Err(e) => return RpcResponse::error(id, -32000, format!("{path}: {e}")),
            }
        }
        self.c64.reset();
        RpcResponse::success(id, json!({ "ok": true }))
    }

    fn handle_cpu_state(&self, id: JsonValue) -> RpcResponse {
        let regs = &self.c64.cpu.regs;
        RpcResponse::success(
            id,
            json!({
                "pc": regs.pc,
                "a": regs.a,
                "x": regs.x,
                "y": regs.y,
                "sp": regs.sp,
                "flags": regs.flags.pack(),
                "cycle": self.c64.cycle(),
                "disassembly": self.c64.disassemble_pc(),
            }),
        )
    }

    fn handle_screenshot(&self, id: JsonValue) -> RpcResponse {
        let rgba: Vec<u8> = self
            .c64
            .screen_buffer()
            .iter()
            .flat_map(|px| px.to_be_bytes())
            .collect();
        let encoded = base64::engine::general_purpose::STANDARD.encode(rgba);
        RpcResponse::success(
            id,
            json!({
                "width": self.c64.screen_width(),
                "height": self.c64.screen_height(),
                "rgba": encoded,
            }),
        )
    }

    fn handle_load_prg(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let Some(path) = param_str(params, "path") else {
            return RpcResponse::error(id, -32602, "missing path".into());
        };
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) => return RpcResponse::error(id, -32000, format!("{path}: {e}")),
        };
        let mut archive = match PrgArchive::from_bytes(path, &data) {
            Ok(a) => a,
            Err(e) => return RpcResponse::error(id, -32000, e.to_string()),
        };
        match self.c64.flash_program(&mut archive, 0) {
            Ok(addr) => RpcResponse::success(id, json!({ "load_addr": addr })),
            Err(e) => RpcResponse::error(id, -32000, e.to_string()),
        }
    }

    fn handle_attach_cartridge(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let Some(path) = param_str(params, "path") else {
            return RpcResponse::error(id, -32602, "missing path".into());
        };
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) => return RpcResponse::error(id, -32000, format!("{path}: {e}")),
        };
        let record = match CrtCartridge::from_bytes(&data) {
            Ok(r) => r,
            Err(e) => return RpcResponse::error(id, -32000, e.to_string()),
        };
        match self.c64.attach_cartridge(&record) {
            Ok(()) => {
                self.c64.reset();
                RpcResponse::success(id, json!({ "name": record.name }))
            }
            Err(e) => RpcResponse::error(id, -32000, e.to_string()),
        }
    }

    fn handle_snapshot_load(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let Some(encoded) = param_str(params, "snapshot") else {
            return RpcResponse::error(id, -32602, "missing snapshot".into());
        };
        let bytes = match base64::engine::general_purpose::STANDARD.decode(encoded) {
            Ok(b) => b,
            Err(e) => return RpcResponse::error(id, -32000, format!("bad base64: {e}")),
        };
        let snapshot = match crate::Snapshot::from_bytes(&bytes) {
            Ok(s) => s,
            Err(e) => return RpcResponse::error(id, -32000, e.to_string()),
        };
        self.c64.suspend();
        let result = self.c64.load_snapshot(&snapshot);
        self.c64.resume();
        match result {
            Ok(()) => RpcResponse::success(id, json!({ "ok": true })),
            Err(e) => RpcResponse::error(id, -32000, e.to_string()),
        }
    }
}
