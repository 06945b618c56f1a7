use color_eyre::Result;
use pretty_assertions::assert_eq;
use serial_monitor::client::ClientHandle;

mod common;
use common::*;

async fn next_until(client: &mut ClientHandle, expected: &str) -> Result<()> {
    loop {
        let text = tokio::time::timeout(TIMEOUT, client.next_text()).await??;

        if text == expected {
            return Ok(());
        }
    }
}

#[tokio::test]
async fn client_handle_round_trip() -> Result<()> {
    let mut setup = start(quick_config()).await?;
    let mut client = ClientHandle::new(&setup.url()).await?;

    next_until(&mut client, "Available ports: [COM1, COM3]").await?;

    client.reconfigure("COM1", 115_200).await?;
    next_until(&mut client, "Connected to serial port COM1 at 115200 baud.").await?;

    let mut device = setup.next_device().await?;

    client.command("hello").await?;
    assert_eq!(device.read_line().await?, "hello\n");
    next_until(&mut client, "Sent to serial port: hello").await?;

    device.emit("grüße\r\n".as_bytes()).await?;
    next_until(&mut client, "grüße").await?;

    Ok(())
}
