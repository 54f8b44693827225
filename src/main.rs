//! `filesys`: interactive shell over a FAT32 disk image.
//!
//! One command per line against the volume engine; errors are printed
//! inline and never end the session. The image is the only persistent
//! state.

use clap::{Arg, Command};
use fat32_shell::device::ImageFile;
use fat32_shell::fs::FileSystem;
use fat32_shell::FsError;
use log::error;
use std::fs::OpenOptions;
use std::io::{stdin, stdout, Write};
use std::sync::Arc;

fn main() {
    env_logger::init();

    let matches = Command::new("filesys")
        .about("Interactive shell for inspecting and editing a FAT32 image")
        .arg(
            Arg::new("image")
                .required(true)
                .value_name("IMAGE")
                .help("Path to a FAT32 image file"),
        )
        .get_matches();

    let image_path = matches
        .get_one::<String>("image")
        .expect("image argument is required")
        .clone();

    let file = match OpenOptions::new().read(true).write(true).open(&image_path) {
        Ok(file) => file,
        Err(err) => {
            error!("cannot open {image_path}: {err}");
            eprintln!("Error opening image file: {err}");
            std::process::exit(1);
        }
    };

    let device = Arc::new(ImageFile::new(file));
    let mut fs = match FileSystem::open(device) {
        Ok(fs) => fs,
        Err(err) => {
            error!("cannot read boot sector of {image_path}: {err}");
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let mut line = String::new();
    loop {
        print!("[{}{}]/> ", image_path, fs.path());
        stdout().flush().expect("failed to flush stdout");

        line.clear();
        match stdin().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let mut tokens = line.split_whitespace();
        let Some(cmd) = tokens.next() else {
            continue;
        };

        match cmd {
            "exit" => break,

            "info" => {
                let geometry = fs.geometry();
                println!("Bytes Per Sector: {}", geometry.bytes_per_sector());
                println!("Sectors Per Cluster: {}", geometry.sectors_per_cluster());
                println!("Root Cluster: {}", geometry.root_cluster());
                println!(
                    "Total # of Clusters in Data Region: {}",
                    geometry.data_cluster_cnt()
                );
                println!("Sectors Per FAT: {}", geometry.sectors_per_fat());
                println!("Size of Image (in bytes): {}", geometry.image_size());
            }

            "cd" => {
                let Some(name) = tokens.next() else {
                    println!("Usage: cd [NAME]");
                    continue;
                };
                if let Err(err) = fs.change_directory(name) {
                    report(err);
                }
            }

            "ls" => match fs.list_directory() {
                Ok(names) => {
                    for name in names {
                        println!("{name}");
                    }
                }
                Err(err) => report(err),
            },

            "mkdir" => {
                let Some(name) = tokens.next() else {
                    println!("Usage: mkdir [NAME]");
                    continue;
                };
                match fs.create_directory(name) {
                    Ok(()) => println!("Directory created successfully"),
                    Err(err) => report(err),
                }
            }

            "creat" => {
                let Some(name) = tokens.next() else {
                    println!("Usage: creat [NAME]");
                    continue;
                };
                match fs.create_file(name) {
                    Ok(()) => println!("File created successfully"),
                    Err(err) => report(err),
                }
            }

            "rm" => {
                let Some(name) = tokens.next() else {
                    println!("Usage: rm [NAME]");
                    continue;
                };
                match fs.remove_file(name) {
                    Ok(()) => println!("File removed successfully"),
                    Err(err) => report(err),
                }
            }

            "rmdir" => {
                let Some(name) = tokens.next() else {
                    println!("Usage: rmdir [NAME]");
                    continue;
                };
                match fs.remove_directory(name) {
                    Ok(()) => println!("Directory removed successfully"),
                    Err(err) => report(err),
                }
            }

            "open" => {
                let (Some(name), Some(mode)) = (tokens.next(), tokens.next()) else {
                    println!("Usage: open [FILENAME] [-r | -w | -rw | -wr]");
                    continue;
                };
                match fs.open_file(name, mode) {
                    Ok(()) => println!("File opened successfully: {name}"),
                    Err(err) => report(err),
                }
            }

            "close" => {
                let Some(name) = tokens.next() else {
                    println!("Usage: close [FILENAME]");
                    continue;
                };
                match fs.close_file(name) {
                    Ok(()) => println!("File closed successfully: {name}"),
                    Err(err) => report(err),
                }
            }

            "lsof" => {
                let open: Vec<_> = fs.open_files().collect();
                if open.is_empty() {
                    println!("No files are currently opened.");
                } else {
                    println!("Opened Files:");
                    for (index, file) in open {
                        println!(
                            "Index: {}, File: {}, Mode: {}, Offset: {}, Path: {}",
                            index,
                            file.name(),
                            file.mode().label(),
                            file.offset(),
                            fs.path()
                        );
                    }
                }
            }

            "lseek" => {
                let (Some(name), Some(offset)) = (tokens.next(), tokens.next()) else {
                    println!("Invalid command format. Usage: lseek [FILENAME] [OFFSET]");
                    continue;
                };
                let Ok(offset) = offset.parse::<u32>() else {
                    println!("Invalid command format. Usage: lseek [FILENAME] [OFFSET]");
                    continue;
                };
                match fs.seek_file(name, offset) {
                    Ok(()) => println!("Offset set to {offset} for file: {name}"),
                    Err(err) => report(err),
                }
            }

            "read" => {
                let (Some(name), Some(size)) = (tokens.next(), tokens.next()) else {
                    println!("Invalid command format. Usage: read [FILENAME] [SIZE]");
                    continue;
                };
                let Ok(size) = size.parse::<usize>() else {
                    println!("Invalid command format. Usage: read [FILENAME] [SIZE]");
                    continue;
                };
                match fs.read_file(name, size) {
                    Ok(data) => {
                        print!("{}", String::from_utf8_lossy(&data));
                        println!("\nRead {} bytes from file: {}", data.len(), name);
                    }
                    Err(err) => report(err),
                }
            }

            "write" => {
                let Some(name) = tokens.next() else {
                    println!("Invalid command format. Usage: write [FILENAME] \"[STRING]\"");
                    continue;
                };
                let Some(data) = quoted_argument(&line) else {
                    println!("Invalid command format. Usage: write [FILENAME] \"[STRING]\"");
                    continue;
                };
                match fs.write_file(name, data.as_bytes()) {
                    Ok(_) => println!("Data written successfully to file: {name}"),
                    Err(err) => report(err),
                }
            }

            "help" => print_help(),

            _ => println!("Unknown command: {cmd}"),
        }
    }
}

fn report(err: FsError) {
    println!("Error: {err}.");
}

/// The text between the first pair of double quotes on the line.
fn quoted_argument(line: &str) -> Option<&str> {
    let start = line.find('"')?;
    let rest = &line[start + 1..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

fn print_help() {
    println!("info                      print volume geometry");
    println!("ls                        list the current directory");
    println!("cd NAME                   change directory ('.' and '..' work)");
    println!("mkdir NAME                create an empty directory");
    println!("creat NAME                create an empty file");
    println!("rm NAME                   delete a file");
    println!("rmdir NAME                delete an empty directory");
    println!("open NAME MODE            open a file (-r, -w, -rw, -wr)");
    println!("close NAME                close an open file");
    println!("lsof                      list open files");
    println!("lseek NAME OFFSET         set the offset of an open file");
    println!("read NAME SIZE            read SIZE bytes at the offset");
    println!("write NAME \"STRING\"       write STRING at the offset");
    println!("exit                      quit");
}
