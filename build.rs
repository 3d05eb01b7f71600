fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Provider plugin contract. The server half is compiled too so the crate can
    // host in-process providers (mock backend, integration tests).
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/v1alpha1/provider.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/v1alpha1/provider.proto");

    Ok(())
}
