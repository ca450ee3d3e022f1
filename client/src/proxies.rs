//! The fixed vector of server proxies, one per configured address.

use std::ops::Index;

use scatter_io::{Connector, PoolStrategy, Transport};
use scatter_protocol::Flavor;

use crate::proxy::{shared_block, ServerProxy, ServerProxyConfig};

/// Indexed collection of proxies sharing one health block.
///
/// Constructed once at client init and immutable afterwards; the ring's
/// indices point into this vector.
pub(crate) struct ServerProxies<C: Connector> {
    proxies: Vec<ServerProxy<C>>,
}

impl<C: Connector> ServerProxies<C>
where
    C::Conn: Transport,
{
    pub(crate) fn new(
        connectors: Vec<C>,
        flavor: Flavor,
        strategy: PoolStrategy,
        config: &ServerProxyConfig,
    ) -> Self {
        let shared = shared_block(connectors.len());
        let proxies = connectors
            .into_iter()
            .enumerate()
            .map(|(slot, connector)| {
                ServerProxy::new(connector, shared.clone(), slot, flavor, strategy, config)
            })
            .collect();
        ServerProxies { proxies }
    }

    /// All proxies, for broadcast operations.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &ServerProxy<C>> {
        self.proxies.iter()
    }
}

impl<C: Connector> Index<usize> for ServerProxies<C> {
    type Output = ServerProxy<C>;

    fn index(&self, index: usize) -> &ServerProxy<C> {
        &self.proxies[index]
    }
}
