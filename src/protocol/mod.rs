//! Wire protocol: the JSON messages exchanged with the verdict service.

mod messages;

pub use messages::{
    AuthRequest, AuthResponse, ErrorMessage, InboundMessage, Kind, ProblemDetails,
    RequestAttributes, VerdictRequest, VerdictRequestForStream, VerdictRequestForUrl,
    VerdictResponse, WireRequest,
};
