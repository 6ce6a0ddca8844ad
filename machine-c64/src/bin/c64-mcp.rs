//! Headless C64 controlled over JSON-RPC on stdin/stdout.

use machine_c64::McpServer;

fn main() {
    env_logger::init();
    McpServer::new().run();
}
