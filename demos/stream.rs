//! Stream Demo - pipelined inference against a running server.
//!
//! This demo shows:
//! - Listing the server's models
//! - Opening a stream with a bounded queue depth
//! - Sending frames and receiving results in send order via a callback
//! - Draining the batch and closing the session
//!
//! # Running
//!
//! ```text
//! cargo run --example stream -- tcp://localhost:8778 mobilenet_v2 image1.jpg image2.jpg
//! ```

use std::time::Duration;

use inferlink_client::{Envelope, Session, Value};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let address = args.next().unwrap_or_else(|| "localhost".to_string());
    let model = args.next().unwrap_or_else(|| "mobilenet_v2".to_string());
    let images: Vec<String> = args.collect();

    let mut session = Session::builder(address)
        .inference_timeout(Duration::from_secs(30))
        .connect()
        .await?;

    for info in session.model_list().await? {
        println!("model: {}", info.name);
    }

    session.open_stream(&model, 4, &Value::Null).await?;
    session.result_observe(|result: Envelope, frame: String| {
        println!("{} -> {:?}", frame, result.get("result"));
    });

    for path in &images {
        let data = std::fs::read(path)?;
        session.send(&[data], path.clone()).await?;
    }
    session.drain().await?;

    session.close().await?;
    Ok(())
}
