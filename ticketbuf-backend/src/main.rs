use std::path::PathBuf;

#[tokio::main]
async fn main() {
    ticketbuf_backend::run(std::env::args().nth(1).map(PathBuf::from)).await;
}
