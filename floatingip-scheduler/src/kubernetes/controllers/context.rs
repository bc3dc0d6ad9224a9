use crate::allocations::PoolAllocations;
use crate::assigner::FloatingIpAssigner;
use crate::kubernetes::controllers::metrics::ControllerMetrics;

pub(crate) struct Context<L, C, P> {
    pub assigner: FloatingIpAssigner<L, C, P>,
    pub allocations: PoolAllocations,
    pub metrics: ControllerMetrics,
}
