use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process;

use modmap::PeImage;

#[derive(Parser, Debug)]
#[command(name = "modmap", version, about = "Manual mapper for PE32+ modules")]
struct Cli {
    /// Path to the PE32+ image to map
    input: PathBuf,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            process::exit(1);
        }
    };

    let bytes = match fs::read(&cli.input) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("Error reading '{}': {}", cli.input.display(), err);
            process::exit(1);
        }
    };
    println!("[*] read {} bytes from {}", bytes.len(), cli.input.display());

    let image = match PeImage::parse(bytes) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("Error parsing PE: {}", err);
            process::exit(1);
        }
    };
    println!(
        "[*] PE parsed: {} sections, image size 0x{:X}, preferred base 0x{:016X}",
        image.section_headers().len(),
        image.image_size(),
        image.image_base()
    );

    #[cfg(windows)]
    {
        let loader = modmap::Loader::new(modmap::WindowsHost);
        match loader.load(&image) {
            Some(module) => {
                println!(
                    "[*] module mapped at 0x{:016X}",
                    module.image_base() as usize
                );
            }
            None => {
                eprintln!("failed to load module");
                process::exit(1);
            }
        }
    }

    #[cfg(not(windows))]
    {
        eprintln!("module mapping requires a Windows host");
        process::exit(1);
    }
}
