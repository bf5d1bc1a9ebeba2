pub mod connection;
pub mod session;
pub mod store;

use std::io::Write;

pub fn init_logger() {
    let _ = env_logger::builder()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .try_init();
}
