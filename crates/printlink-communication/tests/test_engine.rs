use printlink_communication::protocol::{frame_line, parse_frame};
use printlink_communication::{
    PrinterComm, StaticCandidates, VirtualPrinter, VirtualTransportFactory,
};
use printlink_core::{
    CommunicationEvent, ConnectionEvent, ConnectionState, ErrorEvent, ErrorReason, EventCategory,
    EventFilter, JobEvent, PrinterEvent, SdFileEntry, TemperatureReading,
};
use printlink_settings::{CommConfig, ResendOkPolicy};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const PORT: &str = "virtual";

type Recorded = Arc<Mutex<Vec<PrinterEvent>>>;

/// Command text of a written line, with line number and checksum removed.
fn command_of(line: &str) -> String {
    parse_frame(line)
        .map(|frame| frame.command)
        .unwrap_or_else(|| line.to_string())
}

/// Temperature polls only happen on connect.
fn quiet_config() -> CommConfig {
    let mut config = CommConfig::for_port(PORT, 115200);
    config.timeouts.temperature = 1000.0;
    config.timeouts.temperature_target_set = 1000.0;
    config
}

fn record(comm: &PrinterComm, filter: EventFilter) -> Recorded {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    comm.events()
        .subscribe(filter, move |event| sink.lock().unwrap().push(event));
    events
}

fn has_event(events: &Recorded, predicate: impl Fn(&PrinterEvent) -> bool) -> bool {
    events.lock().unwrap().iter().any(predicate)
}

async fn wait_for_state(comm: &PrinterComm, expected: ConnectionState, within: Duration) -> bool {
    let mut states = comm.watch_state();
    let result = tokio::time::timeout(within, states.wait_for(|state| *state == expected)).await;
    matches!(result, Ok(Ok(_)))
}

async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Let the engine drain everything that is in flight.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Open an engine on `printer` and wait for the connect sequence to finish.
async fn connect(printer: &VirtualPrinter, config: CommConfig) -> (PrinterComm, Recorded) {
    let comm = PrinterComm::builder(config)
        .transport_factory(VirtualTransportFactory::single(PORT, printer.clone()))
        .build();
    let events = record(&comm, EventFilter::All);
    comm.open().unwrap();
    assert!(wait_for_state(&comm, ConnectionState::Operational, Duration::from_secs(10)).await);
    settle().await;
    (comm, events)
}

/// Acknowledge everything, answer `M105` with a temperature report.
fn marlin_responder(line: &str, _baudrate: u32) -> Vec<String> {
    if line.is_empty() {
        return Vec::new();
    }
    if command_of(line) == "M105" {
        return vec!["ok T:200.0 /210.0 B:60.0 /60.0".to_string()];
    }
    vec!["ok".to_string()]
}

/// Acknowledge everything except `stall_on`.
fn stalling_printer(stall_on: &'static str) -> VirtualPrinter {
    VirtualPrinter::with_responder(move |line, _| {
        if line.is_empty() || command_of(line) == stall_on {
            Vec::new()
        } else {
            vec!["ok".to_string()]
        }
    })
}

fn numbered_moves(count: u32) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".gcode").tempfile().unwrap();
    for i in 1..=count {
        writeln!(file, "G1 X{}", i).unwrap();
    }
    file.flush().unwrap();
    file
}

#[tokio::test(start_paused = true)]
async fn test_connect_sequence() {
    let printer = VirtualPrinter::with_responder(marlin_responder);
    let (comm, events) = connect(&printer, quiet_config()).await;

    let commands = printer.written_commands();
    assert_eq!(printer.written()[0], "N0 M110 N0*125");
    for expected in ["M110 N0", "M115", "M21", "M105"] {
        assert!(commands.iter().any(|c| c == expected), "missing {}", expected);
    }
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Connection(ConnectionEvent::Connected { port, baudrate: 115200 }) if port == PORT
    )));
    assert_eq!(comm.port().as_deref(), Some(PORT));
    assert_eq!(comm.state_label(), "Operational");

    comm.close(false).await;
    assert_eq!(comm.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_temperature_report_on_ok() {
    let printer = VirtualPrinter::with_responder(marlin_responder);
    let (comm, _) = connect(&printer, quiet_config()).await;

    printer.clear_written();
    comm.reset_line_numbers(0);
    assert!(comm.send_command("M105"));
    assert!(printer.wait_for_written(2, Duration::from_secs(5)).await);
    settle().await;

    assert_eq!(printer.written(), vec!["N0 M110 N0*125", "N1 M105*38"]);
    let temperatures = comm.temperatures();
    assert_eq!(
        temperatures.tool(0),
        Some(TemperatureReading::new(200.0, Some(210.0)))
    );
    assert_eq!(temperatures.bed(), TemperatureReading::new(60.0, Some(60.0)));
    assert_eq!(comm.clear_to_send(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resend_replays_history() {
    let printer = VirtualPrinter::auto_ok();
    let (comm, _) = connect(&printer, quiet_config()).await;

    comm.reset_line_numbers(5);
    comm.send_command("G1 X1");
    comm.send_command("G1 X2");
    settle().await;
    assert_eq!(comm.current_line(), 8);

    printer.clear_written();
    printer.send_line("Resend: 5");
    printer.send_line("ok");
    assert!(printer.wait_for_written(3, Duration::from_secs(5)).await);
    settle().await;

    assert_eq!(
        printer.written(),
        vec![
            frame_line(5, "M110 N5"),
            frame_line(6, "G1 X1"),
            frame_line(7, "G1 X2"),
        ]
    );

    printer.clear_written();
    comm.send_command("G1 X3");
    assert!(printer.wait_for_written(1, Duration::from_secs(5)).await);
    assert_eq!(printer.written(), vec![frame_line(8, "G1 X3")]);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_timeouts_close_connection() {
    let printer = VirtualPrinter::auto_ok();
    let (comm, _) = connect(&printer, CommConfig::for_port(PORT, 115200)).await;
    let errors = record(&comm, EventFilter::Categories(vec![EventCategory::Error]));

    printer.clear_responder();
    assert!(
        wait_for_state(&comm, ConnectionState::ClosedWithError, Duration::from_secs(300)).await
    );
    assert!(has_event(&errors, |event| matches!(
        event,
        PrinterEvent::Error(ErrorEvent::Fatal {
            reason: ErrorReason::Timeout,
            ..
        })
    )));
    assert_eq!(
        comm.error_text(),
        "Too many consecutive timeouts, printer still connected and alive?"
    );
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_start_resets_line_numbers() {
    let printer = VirtualPrinter::auto_ok();
    let (comm, events) = connect(&printer, quiet_config()).await;

    comm.send_command("G28");
    comm.send_command("G1 X10");
    settle().await;

    printer.send_line("start");
    settle().await;

    assert_eq!(comm.state(), ConnectionState::Operational);
    assert_eq!(comm.current_line(), 1);
    let history = comm.sent_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].line_number, 0);
    assert_eq!(history[0].command, "M110 N0");
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Connection(ConnectionEvent::PrinterReset { idle: true })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_local_print_runs_to_completion() {
    let printer = VirtualPrinter::auto_ok();
    let (comm, events) = connect(&printer, quiet_config()).await;

    let mut file = tempfile::Builder::new().suffix(".gcode").tempfile().unwrap();
    write!(file, "G28\nG1 X10 Y10 ; move\n; full line comment\n\nG1 X20\n").unwrap();
    file.flush().unwrap();

    comm.select_file(file.path().to_str().unwrap(), false).unwrap();
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Job(JobEvent::FileSelected { name: Some(_), .. })
    )));

    printer.clear_written();
    comm.start_print(None).unwrap();

    assert!(eventually(|| has_event(&events, |event| matches!(
        event,
        PrinterEvent::Job(JobEvent::PrintDone { .. })
    )))
    .await);
    assert!(wait_for_state(&comm, ConnectionState::Operational, Duration::from_secs(5)).await);

    let commands = printer.written_commands();
    let position = |needle: &str| commands.iter().position(|c| c == needle);
    let g28 = position("G28").unwrap();
    let first_move = position("G1 X10 Y10").unwrap();
    let second_move = position("G1 X20").unwrap();
    let wait = position("M400").unwrap();
    assert!(g28 < first_move && first_move < second_move && second_move < wait);
    assert!(commands.iter().all(|c| !c.contains(';')));

    let job = comm.job().unwrap();
    assert!(job.done);
    assert_eq!(job.progress, Some(1.0));
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let printer = stalling_printer("G1 X50");
    let mut config = quiet_config();
    config.log_position_on_pause = false;
    let (comm, events) = connect(&printer, config).await;

    let file = numbered_moves(100);
    comm.select_file(file.path().to_str().unwrap(), false).unwrap();
    comm.start_print(None).unwrap();
    assert!(
        printer
            .wait_until(Duration::from_secs(30), |lines| {
                lines.iter().any(|line| command_of(line) == "G1 X50")
            })
            .await
    );

    comm.set_pause(true);
    assert_eq!(comm.state(), ConnectionState::Pausing);
    printer.send_line("ok");
    assert!(wait_for_state(&comm, ConnectionState::Paused, Duration::from_secs(5)).await);
    settle().await;

    assert!(!printer.written_commands().iter().any(|c| c == "G1 X51"));
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Job(JobEvent::PrintPaused { .. })
    )));

    comm.set_pause(false);
    assert!(eventually(|| has_event(&events, |event| matches!(
        event,
        PrinterEvent::Job(JobEvent::PrintDone { .. })
    )))
    .await);
    assert!(printer.written_commands().iter().any(|c| c == "G1 X100"));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_aborts_heatup_and_stops_job() {
    let printer = stalling_printer("G1 X50");
    let mut config = quiet_config();
    config.log_position_on_cancel = false;
    let (comm, events) = connect(&printer, config).await;

    let file = numbered_moves(100);
    comm.select_file(file.path().to_str().unwrap(), false).unwrap();
    comm.start_print(None).unwrap();
    assert!(
        printer
            .wait_until(Duration::from_secs(30), |lines| {
                lines.iter().any(|line| command_of(line) == "G1 X50")
            })
            .await
    );

    comm.cancel_print();
    assert_eq!(comm.state(), ConnectionState::Cancelling);
    printer.send_line("ok");
    assert!(wait_for_state(&comm, ConnectionState::Operational, Duration::from_secs(5)).await);
    settle().await;

    let commands = printer.written_commands();
    assert!(commands.iter().any(|c| c == "M108"));
    assert!(!commands.iter().any(|c| c == "G1 X51"));
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Job(JobEvent::PrintCancelled { .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_emergency_stop_switches_heaters_off_and_closes() {
    let printer = VirtualPrinter::auto_ok();
    let (comm, _) = connect(&printer, quiet_config()).await;

    printer.clear_written();
    comm.emergency_stop();
    assert!(
        wait_for_state(&comm, ConnectionState::ClosedWithError, Duration::from_secs(5)).await
    );

    let written = printer.written();
    assert_eq!(written[0], "M112");
    let commands = printer.written_commands();
    assert_eq!(commands.iter().filter(|c| *c == "M112").count(), 2);
    assert!(commands.iter().any(|c| c == "M104 T0 S0"));
    assert!(commands.iter().any(|c| c == "M140 S0"));
    assert!(comm.error_text().contains("emergency stop"));
}

#[tokio::test(start_paused = true)]
async fn test_autodetection_finds_port_and_baudrate() {
    let printer = VirtualPrinter::with_responder(|line, baudrate| {
        if baudrate == 250000 && !line.is_empty() {
            vec!["ok".to_string()]
        } else {
            Vec::new()
        }
    });
    let mut config = quiet_config();
    config.port = None;
    config.baudrate = None;

    let comm = PrinterComm::builder(config)
        .transport_factory(VirtualTransportFactory::single("ttyB", printer.clone()))
        .candidates(StaticCandidates::new(
            vec!["ttyA".to_string(), "ttyB".to_string()],
            Vec::new(),
        ))
        .build();
    comm.open().unwrap();

    assert!(wait_for_state(&comm, ConnectionState::Operational, Duration::from_secs(60)).await);
    assert_eq!(comm.port().as_deref(), Some("ttyB"));
    assert_eq!(comm.baudrate(), Some(250000));
}

#[tokio::test(start_paused = true)]
async fn test_autodetection_without_answer_fails() {
    let printer = VirtualPrinter::new();
    let mut config = quiet_config();
    config.port = Some("ttyB".to_string());
    config.baudrate = None;

    let comm = PrinterComm::builder(config)
        .transport_factory(VirtualTransportFactory::single("ttyB", printer))
        .candidates(StaticCandidates::new(vec!["ttyB".to_string()], vec![115200]))
        .build();
    let errors = record(&comm, EventFilter::Categories(vec![EventCategory::Error]));
    comm.open().unwrap();

    assert!(
        wait_for_state(&comm, ConnectionState::ClosedWithError, Duration::from_secs(60)).await
    );
    assert!(has_event(&errors, |event| matches!(
        event,
        PrinterEvent::Error(ErrorEvent::Fatal {
            reason: ErrorReason::Autodetect,
            ..
        })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_stalled_writes_close_connection() {
    let printer = VirtualPrinter::auto_ok();
    let (comm, _) = connect(&printer, quiet_config()).await;

    printer.stall_writes(true);
    comm.send_command("M105");
    assert!(
        wait_for_state(&comm, ConnectionState::ClosedWithError, Duration::from_secs(10)).await
    );
    assert_eq!(comm.error_text(), "Could not write to serial port");
}

#[tokio::test(start_paused = true)]
async fn test_sd_card_listing() {
    let printer = VirtualPrinter::with_responder(|line, _| {
        if line.is_empty() {
            return Vec::new();
        }
        let answer: &[&str] = match command_of(line).as_str() {
            "M21" => &["echo:SD card ok", "ok"],
            "M20" => &["Begin file list", "CUBE.GCO 1234", "NOTES.TXT 12", "End file list", "ok"],
            _ => &["ok"],
        };
        answer.iter().map(|s| s.to_string()).collect()
    });
    let (comm, events) = connect(&printer, quiet_config()).await;

    assert!(eventually(|| !comm.sd_files().is_empty()).await);
    assert!(comm.is_sd_ready());
    assert_eq!(
        comm.sd_files(),
        vec![SdFileEntry {
            name: "/cube.gco".to_string(),
            size: Some(1234),
        }]
    );
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Sd(printlink_core::SdEvent::FilesListed { files }) if files.len() == 1
    )));
}

#[tokio::test(start_paused = true)]
async fn test_detect_policy_simulates_missing_ok() {
    let printer = VirtualPrinter::auto_ok();
    let (comm, events) = connect(&printer, quiet_config()).await;

    comm.reset_line_numbers(5);
    comm.send_command("G1 X1");
    comm.send_command("G1 X2");
    settle().await;
    assert_eq!(comm.current_line(), 8);

    printer.clear_written();
    printer.send_line("Resend: 6");
    settle().await;
    assert!(printer.written().is_empty());

    assert!(printer.wait_for_written(2, Duration::from_secs(5)).await);
    settle().await;
    assert_eq!(
        printer.written(),
        vec![frame_line(6, "G1 X1"), frame_line(7, "G1 X2")]
    );
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Communication(CommunicationEvent::Log { line }) if line.contains("Simulating an ok")
    )));
}

#[tokio::test(start_paused = true)]
async fn test_unsolicited_start_during_resend_keeps_sending() {
    let printer = VirtualPrinter::auto_ok();
    let mut config = quiet_config();
    config.trigger_ok_after_resend = ResendOkPolicy::Never;
    let (comm, _) = connect(&printer, config).await;

    comm.send_command("G28");
    comm.send_command("G1 X10");
    settle().await;

    printer.send_line(format!("Resend: {}", comm.current_line() - 2));
    settle().await;
    printer.send_line("start");
    settle().await;
    assert_eq!(comm.state(), ConnectionState::Operational);
    assert_eq!(comm.current_line(), 1);

    printer.clear_written();
    comm.send_command("G1 X9");
    assert!(printer.wait_for_written(1, Duration::from_secs(5)).await);
    assert_eq!(printer.written(), vec![frame_line(1, "G1 X9")]);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_resend_while_idle_keeps_sending() {
    let printer = VirtualPrinter::auto_ok();
    let mut config = quiet_config();
    config.trigger_ok_after_resend = ResendOkPolicy::Never;
    let (comm, events) = connect(&printer, config).await;

    comm.send_command("G28");
    comm.send_command("G1 X10");
    settle().await;

    let current = comm.current_line();
    printer.send_line(format!("Resend: {}", current - 2));
    printer.send_line(format!("Resend: {}", current + 5));
    printer.send_line("ok");
    settle().await;

    assert_eq!(comm.state(), ConnectionState::Operational);
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Error(ErrorEvent::ResendFailed { line, .. }) if *line == current + 5
    )));

    printer.clear_written();
    comm.send_command("G1 X9");
    assert!(printer.wait_for_written(1, Duration::from_secs(5)).await);
    assert_eq!(printer.written(), vec![frame_line(current, "G1 X9")]);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_resend_while_printing_is_fatal() {
    let printer = stalling_printer("G1 X50");
    let (comm, events) = connect(&printer, quiet_config()).await;

    let file = numbered_moves(100);
    comm.select_file(file.path().to_str().unwrap(), false).unwrap();
    comm.start_print(None).unwrap();
    assert!(
        printer
            .wait_until(Duration::from_secs(30), |lines| {
                lines.iter().any(|line| command_of(line) == "G1 X50")
            })
            .await
    );

    printer.send_line(format!("Resend: {}", comm.current_line() + 5));
    assert!(
        wait_for_state(&comm, ConnectionState::ClosedWithError, Duration::from_secs(10)).await
    );
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Error(ErrorEvent::Fatal {
            reason: ErrorReason::Resend,
            ..
        })
    )));
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Job(JobEvent::PrintFailed { .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_resend_requests_are_fatal() {
    let printer = VirtualPrinter::auto_ok();
    let mut config = quiet_config();
    config.max_consecutive_resends = 3;
    let (comm, events) = connect(&printer, config).await;

    comm.send_command("G28");
    comm.send_command("G1 X10");
    settle().await;

    let line = comm.current_line() - 2;
    for _ in 0..4 {
        printer.send_line(format!("Resend: {}", line));
        printer.send_line("ok");
        settle().await;
    }

    assert!(
        wait_for_state(&comm, ConnectionState::ClosedWithError, Duration::from_secs(10)).await
    );
    assert!(has_event(&events, |event| matches!(
        event,
        PrinterEvent::Error(ErrorEvent::Fatal {
            reason: ErrorReason::ResendLoop,
            ..
        })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_commands_bounded_by_ack_max() {
    let printer = VirtualPrinter::auto_ok();
    let mut config = quiet_config();
    config.ack_max = 3;
    let (comm, _) = connect(&printer, config).await;

    printer.clear_responder();
    printer.clear_written();
    for i in 0..6 {
        comm.send_command(format!("G1 X{}", i));
    }
    settle().await;

    let outstanding = printer.written().len();
    assert!((1..=3).contains(&outstanding), "{} lines in flight", outstanding);

    printer.send_line("ok");
    settle().await;
    assert_eq!(printer.written().len(), outstanding + 1);

    for _ in 0..6 {
        printer.send_line("ok");
        settle().await;
        assert!(printer.written().len() <= 6);
    }
    let commands = printer.written_commands();
    let expected: Vec<String> = (0..6).map(|i| format!("G1 X{}", i)).collect();
    assert_eq!(commands, expected);
}

#[tokio::test(start_paused = true)]
async fn test_never_send_checksum_keeps_required_ones() {
    let printer = VirtualPrinter::auto_ok();
    let mut config = quiet_config();
    config.never_send_checksum = true;
    let (comm, _) = connect(&printer, config).await;

    printer.clear_written();
    comm.send_command("G28");
    comm.send_command("M110 N3");
    assert!(printer.wait_for_written(2, Duration::from_secs(5)).await);
    settle().await;

    assert_eq!(
        printer.written(),
        vec!["G28".to_string(), frame_line(3, "M110 N3")]
    );
}
