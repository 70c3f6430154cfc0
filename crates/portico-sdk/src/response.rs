//! Response writer: the single place a status and body cross back to the host.
//!
//! The host hands every invocation a [`ResponseOutparam`]. [`write`] consumes
//! it, so a response can only be committed once per invocation.

use portico_types::HostError;

use crate::error::{Error, Result};
use crate::http::Response;

/// Write side of an outgoing response body.
///
/// Dropping the stream disposes the host resource.
pub trait BodyStream {
    fn blocking_write_and_flush(&mut self, bytes: &[u8]) -> std::result::Result<(), HostError>;
}

/// Outgoing response under construction.
pub trait OutgoingResponse {
    fn set_status_code(&mut self, status: u16) -> std::result::Result<(), HostError>;

    /// Open the body stream. The stream borrows the response, so it must be
    /// dropped before the body can be finished.
    fn open_body(&mut self) -> std::result::Result<Box<dyn BodyStream + '_>, HostError>;

    fn finish_body(&mut self) -> std::result::Result<(), HostError>;
}

/// Slot the host reads the invocation's response from.
pub trait ResponseOutparam {
    type Response: OutgoingResponse;

    fn new_response(
        &mut self,
        headers: &[(String, String)],
    ) -> std::result::Result<Self::Response, HostError>;

    /// Commit `response`. Consumes the outparam.
    fn set(self, response: Self::Response);
}

/// Write `status` and `body` with no extra headers.
///
/// # Errors
///
/// Returns [`Error::Response`] if any host step fails. The outparam is
/// consumed either way; on failure it is dropped without a response.
pub fn write<O: ResponseOutparam>(outparam: O, status: u16, body: &[u8]) -> Result<()> {
    write_with_headers(outparam, status, &[], body)
}

/// Write a full [`Response`].
///
/// # Errors
///
/// See [`write`].
pub fn write_response<O: ResponseOutparam>(outparam: O, response: &Response) -> Result<()> {
    write_with_headers(
        outparam,
        response.status.as_u16(),
        &response.headers,
        &response.body,
    )
}

/// Emit a response in host order: create, set status, write-and-flush the
/// body through a scoped stream, finish the body, commit.
///
/// # Errors
///
/// See [`write`].
pub fn write_with_headers<O: ResponseOutparam>(
    mut outparam: O,
    status: u16,
    headers: &[(String, String)],
    body: &[u8],
) -> Result<()> {
    let mut response = outparam.new_response(headers).map_err(Error::response)?;
    response.set_status_code(status).map_err(Error::response)?;

    {
        let mut stream = response.open_body().map_err(Error::response)?;
        stream
            .blocking_write_and_flush(body)
            .map_err(Error::response)?;
    }

    response.finish_body().map_err(Error::response)?;
    outparam.set(response);
    Ok(())
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::testing::{RecordingOutparam, ResponseEvent};

    #[test]
    fn writes_in_host_order() {
        let outparam = RecordingOutparam::new();
        write(outparam.clone(), 201, b"created").unwrap();

        let record = outparam.record();
        assert_eq!(record.status, Some(201));
        assert_eq!(record.body, b"created");
        assert_eq!(
            record.events,
            vec![
                ResponseEvent::Created,
                ResponseEvent::StatusSet(201),
                ResponseEvent::StreamOpened,
                ResponseEvent::Written(7),
                ResponseEvent::StreamDisposed,
                ResponseEvent::BodyFinished,
                ResponseEvent::Committed,
            ]
        );
    }

    #[test]
    fn stream_is_disposed_when_write_fails() {
        let outparam = RecordingOutparam::new();
        outparam.fail_writes();

        let err = write(outparam.clone(), 200, b"body").unwrap_err();
        assert!(matches!(err, Error::Response(_)));

        let record = outparam.record();
        assert_eq!(
            record.events,
            vec![
                ResponseEvent::Created,
                ResponseEvent::StatusSet(200),
                ResponseEvent::StreamOpened,
                ResponseEvent::StreamDisposed,
            ]
        );
        assert!(!record.committed());
    }

    #[test]
    fn headers_are_forwarded() {
        let outparam = RecordingOutparam::new();
        let response = Response::new(http::StatusCode::ACCEPTED)
            .with_header("content-type", "text/plain")
            .with_body("ok");
        write_response(outparam.clone(), &response).unwrap();

        let record = outparam.record();
        assert_eq!(record.status, Some(202));
        assert_eq!(
            record.headers,
            vec![("content-type".to_string(), "text/plain".to_string())]
        );
        assert_eq!(record.body, b"ok");
    }

    #[test]
    fn empty_body_still_finishes() {
        let outparam = RecordingOutparam::new();
        write(outparam.clone(), 200, b"").unwrap();
        let record = outparam.record();
        assert!(record.events.contains(&ResponseEvent::BodyFinished));
        assert!(record.committed());
    }
}
