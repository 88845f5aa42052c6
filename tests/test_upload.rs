use printlink::upload::{upload, SETTLE_DELAY};
use printlink::{CommConfig, ConnectionState, PrinterComm, VirtualPrinter, VirtualTransportFactory};
use printlink_communication::protocol::parse_frame;
use std::io::Write;
use std::time::Duration;

const PORT: &str = "virtual";

fn command_of(line: &str) -> String {
    parse_frame(line)
        .map(|frame| frame.command)
        .unwrap_or_else(|| line.to_string())
}

/// Acknowledges everything and opens the target file on `M28`.
fn sd_printer() -> VirtualPrinter {
    VirtualPrinter::with_responder(|line, _| {
        if line.is_empty() {
            return Vec::new();
        }
        let command = command_of(line);
        match command.strip_prefix("M28 ") {
            Some(name) => vec![format!("Writing to file: {}", name), "ok".to_string()],
            None => vec!["ok".to_string()],
        }
    })
}

fn comm_for(printer: &VirtualPrinter, port: &str) -> PrinterComm {
    let mut config = CommConfig::for_port(port, 115200);
    config.timeouts.temperature = 1000.0;
    PrinterComm::builder(config)
        .transport_factory(VirtualTransportFactory::single(PORT, printer.clone()))
        .build()
}

#[tokio::test(start_paused = true)]
async fn test_upload_streams_file_between_m28_and_m29() {
    let mut file = tempfile::Builder::new().suffix(".gcode").tempfile().unwrap();
    writeln!(file, "; sliced").unwrap();
    for i in 0..10 {
        writeln!(file, "G1 X{} Y{}", i, i).unwrap();
    }
    file.flush().unwrap();

    let printer = sd_printer();
    let comm = comm_for(&printer, PORT);

    let result = tokio::time::timeout(
        Duration::from_secs(60),
        upload(&comm, file.path(), "part.gco", SETTLE_DELAY),
    )
    .await
    .expect("upload did not finish");
    assert!(result.is_ok(), "upload failed: {:?}", result);
    assert_eq!(comm.state(), ConnectionState::Operational);

    let commands: Vec<String> = printer.written().iter().map(|l| command_of(l)).collect();
    let start = commands.iter().position(|c| c == "M28 part.gco").unwrap();
    let end = commands.iter().position(|c| c == "M29").unwrap();
    assert!(start < end);

    let streamed: Vec<&String> = commands[start + 1..end].iter().collect();
    assert_eq!(streamed.len(), 10);
    assert_eq!(streamed[0], "G1 X0 Y0");
    assert_eq!(streamed[9], "G1 X9 Y9");

    comm.close(false).await;
    assert_eq!(comm.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_upload_fails_when_port_cannot_be_opened() {
    let file = tempfile::Builder::new().suffix(".gcode").tempfile().unwrap();
    let printer = sd_printer();
    let comm = comm_for(&printer, "missing");

    let result = tokio::time::timeout(
        Duration::from_secs(60),
        upload(&comm, file.path(), "part.gco", SETTLE_DELAY),
    )
    .await
    .expect("upload did not finish");

    assert!(result.is_err());
    assert!(comm.state().is_error());
    assert!(printer.written().is_empty());
}
