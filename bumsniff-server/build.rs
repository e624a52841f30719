fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc_path) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc_path);
        }
    }

    let mut config = prost_build::Config::new();
    // Frame payloads fan out to many subscribers; Bytes makes that a
    // refcount clone instead of a copy.
    config.bytes(["."]);

    tonic_build::configure()
        .build_client(false)
        .compile_protos_with_config(config, &["proto/bumstream.proto"], &["proto"])?;
    Ok(())
}
