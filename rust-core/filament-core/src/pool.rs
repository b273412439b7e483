//! Context pooling
//!
//! Released contexts are cleared before they go back, so nothing from one
//! request is observable in the next.

use crate::context::{Context, Shared};
use std::sync::{Arc, Mutex};

/// Bounded pool of reusable contexts
pub(crate) struct ContextPool {
    items: Mutex<Vec<Context>>,
    capacity: usize,
    shared: Arc<Shared>,
}

impl ContextPool {
    pub(crate) fn new(capacity: usize, shared: Arc<Shared>) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
            shared,
        }
    }

    /// Take a cleared context, allocating one if the pool is empty
    pub(crate) fn acquire(&self) -> Context {
        let pooled = self.items.lock().ok().and_then(|mut items| items.pop());
        pooled.unwrap_or_else(|| Context::new(Arc::clone(&self.shared)))
    }

    /// Clear a context and keep it for reuse, unless the pool is full
    pub(crate) fn release(&self, mut ctx: Context) {
        ctx.clear();
        if let Ok(mut items) = self.items.lock() {
            if items.len() < self.capacity {
                items.push(ctx);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn idle(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;
    use crate::request::Request;
    use crate::router::Method;

    #[test]
    fn test_released_context_is_clean() {
        let pool = ContextPool::new(4, Arc::new(Shared::default()));
        let mut ctx = pool.acquire();
        ctx.reset(Request::new(Method::Post, "/a?x=1").with_body("payload"), None);
        ctx.set("user", 7u32);
        ctx.set_params([("id", "1")].into_iter().collect());
        ctx.text(200, "written").unwrap();
        let first = ctx.uniq().to_string();
        pool.release(ctx);

        let ctx = pool.acquire();
        assert_ne!(ctx.uniq(), first);
        assert!(ctx.store().is_empty());
        assert!(ctx.params().is_empty());
        assert!(ctx.queries().is_empty());
        assert!(ctx.body().is_empty());
        assert!(!ctx.response().is_done());
        assert!(ctx.socket().is_none());
    }

    #[test]
    fn test_released_context_drops_socket() {
        let pool = ContextPool::new(4, Arc::new(Shared::default()));
        let mut ctx = pool.acquire();
        let request = Request::new(Method::Get, "/ws")
            .with_header("Upgrade", "websocket")
            .with_header("Connection", "Upgrade")
            .with_header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .with_header("Sec-WebSocket-Version", "13");
        let mut carrier = hyper::Request::new(());
        ctx.reset(request, Some(hyper::upgrade::on(&mut carrier)));
        ctx.upgrade(&Codec::ALL).unwrap();
        assert!(ctx.socket().is_some());
        pool.release(ctx);

        let ctx = pool.acquire();
        assert!(ctx.socket().is_none());
        assert!(!ctx.is_socket());
    }

    #[test]
    fn test_capacity_is_bounded() {
        let pool = ContextPool::new(1, Arc::new(Shared::default()));
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 1);
    }
}
