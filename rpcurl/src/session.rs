//! The resources held during one run: the connection to the server and the schema source
//! built on top of it.
use rpcurl_core::source::SchemaSource;
use rpcurl_core::transport::Transport;

#[derive(Default)]
pub struct Session {
    transport: Option<Transport>,
    source: Option<SchemaSource>,
}

impl Session {
    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    pub fn set_transport(&mut self, transport: Transport) {
        self.transport = Some(transport);
    }

    pub fn source(&mut self) -> Option<&mut SchemaSource> {
        self.source.as_mut()
    }

    pub fn set_source(&mut self, source: SchemaSource) {
        self.source = Some(source);
    }

    /// Releases the reflection client and the channel.
    ///
    /// Returns whether anything was released; calling it again does nothing.
    pub fn reset(&mut self) -> bool {
        // The source owns the reflection client, drop it before the channel.
        let source = self.source.take();
        let transport = self.transport.take();
        let released = source.is_some() || transport.is_some();

        if released {
            tracing::debug!("releasing session resources");
        }
        released
    }

    /// Cleans up and hands `code` to `terminate`, exactly once.
    pub fn finish(mut self, code: i32, terminate: impl FnOnce(i32)) {
        self.reset();
        terminate(code);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.reset();
    }
}
