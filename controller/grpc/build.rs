fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto/session.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/session.proto");
    Ok(())
}
