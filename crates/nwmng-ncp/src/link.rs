use crate::error::Error;
use crate::request::{Ack, Request};

/// One command/response channel to the NCP.
///
/// `request` blocks only for the synchronous acknowledgement; asynchronous
/// results arrive later on the event channel the transport was built with.
/// At most one request is outstanding at a time, which is why the method
/// takes `&mut self`.
pub trait NcpLink: Send {
    fn request(&mut self, req: &Request) -> Result<Ack, Error>;
}

impl<T: NcpLink + ?Sized> NcpLink for Box<T> {
    fn request(&mut self, req: &Request) -> Result<Ack, Error> {
        (**self).request(req)
    }
}
