//! Line codec: stateless parsing of firmware output and framing of
//! outgoing commands.

pub mod errors;
pub mod framing;
pub mod gcode;
pub mod parser;

pub use errors::{classify_error, is_fatal_error, ErrorClass};
pub use framing::{checksum, encode_line, frame_line, parse_frame, Frame};
pub use gcode::{
    command_code, float_parameter, int_parameter, process_gcode_line, strip_comment, CommandCode,
    TemperatureOffsets,
};
pub use parser::{
    canonicalize_temperatures, parse_capability_line, parse_firmware_line, parse_position_line,
    parse_resend_line, parse_temperature_line, Heater, ParsedReading, ParsedTemperatures,
    PositionReport,
};
