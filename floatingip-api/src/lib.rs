//! Client side of the external IPAM service, generated from
//! `proto/ipam/v1/ipam.proto`.
pub mod ipam {
    pub mod v1 {
        tonic::include_proto!("ipams");
    }
}
