use waypost_backend::connection::{self, HandlerError};
use waypost_backend::store::MemoryStore;

static PORT: u32 = 5050;

#[tokio::main]
async fn main() -> Result<(), HandlerError> {
    waypost_backend::init_logger();
    let addr = "0.0.0.0:".to_owned() + &PORT.to_string();

    connection::establish(addr, MemoryStore::new()).await
}
