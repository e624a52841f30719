//! Generated wire types and service glue for the BUM stream RPC.

tonic::include_proto!("bumstream");
