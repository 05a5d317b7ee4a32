//! enrolldb - declarative transactions for a university enrollment service
//!
//! Runs the enrollment scenarios against an in-memory store and prints what
//! each one left behind.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::LevelFilter;

use enrolldb::storage::MemoryStore;
use enrolldb::transaction::{TransactionConfig, TransactionDefinition, TransactionManager};
use enrolldb::university::{ServiceResult, Student, UniversityService};

/// What the command line asked for.
#[derive(Debug)]
enum Command {
    Run {
        config: TransactionConfig,
        export: Option<PathBuf>,
    },
    Help,
    Version,
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    let mut config = TransactionConfig::new();
    let mut export: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-v" | "--verbose" => {
                config = config.verbose(true);
            }
            "--pool-size" => {
                i += 1;
                match args.get(i).and_then(|n| n.parse::<usize>().ok()) {
                    Some(n) => config = config.pool_size(n),
                    None => return Err("--pool-size needs a number".to_string()),
                }
            }
            "--strict-isolation" => {
                config = config.validate_existing_isolation(true);
            }
            "--export" => {
                i += 1;
                match args.get(i) {
                    Some(path) => export = Some(PathBuf::from(path)),
                    None => return Err("--export needs a path".to_string()),
                }
            }
            "-h" | "--help" => return Ok(Command::Help),
            "--version" => return Ok(Command::Version),
            arg => return Err(format!("Unknown option: {}", arg)),
        }
        i += 1;
    }
    Ok(Command::Run { config, export })
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let (config, export) = match parse_args(&args) {
        Ok(Command::Run { config, export }) => (config, export),
        Ok(Command::Help) => {
            print_help();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            println!("enrolldb v{}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Err(message) => {
            eprintln!("{}", message);
            return ExitCode::FAILURE;
        }
    };

    // RUST_LOG, when set, overrides the -v default.
    let mut logger = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(if config.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        });
    }
    logger.init();

    let store = Arc::new(MemoryStore::new());
    let manager = TransactionManager::with_config(store.clone(), config);

    match run_scenarios(manager) {
        Ok(service) => {
            if let Err(e) = print_tables(&service) {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let stats = store.stats();
    println!(
        "storage: {} begin, {} commit, {} rollback, {} savepoint ({} rolled back, {} released)",
        stats.begins,
        stats.commits,
        stats.rollbacks,
        stats.savepoints,
        stats.savepoint_rollbacks,
        stats.savepoint_releases
    );

    if let Some(path) = export {
        if let Err(e) = store.export_json(&path) {
            eprintln!("Error exporting to {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        println!("exported to {}", path.display());
    }

    ExitCode::SUCCESS
}

fn print_help() {
    println!("enrolldb - declarative transactions for a university enrollment service");
    println!();
    println!("Usage: enrolldb [OPTIONS]");
    println!();
    println!("Options:");
    println!("  -v, --verbose          Log every begin, commit, rollback and savepoint");
    println!("  --pool-size N          Maximum open physical transactions (default: 10)");
    println!("  --strict-isolation     Reject joining a transaction at another isolation");
    println!("  --export PATH          Write the final tables to PATH as JSON");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
}

fn run_scenarios(manager: TransactionManager) -> ServiceResult<UniversityService> {
    let service = UniversityService::new(manager)?;
    let mut session = service.session();

    let alice = service.create_student(
        &mut session,
        Student::new("Alice", "alice@example.edu", "Computer Science", 2),
    )?;
    let bob = service.create_student(
        &mut session,
        Student::new("Bob", "bob@example.edu", "Mathematics", 3),
    )?;
    let databases = service.add_new_course(&mut session, "Databases", 2)?;
    let compilers = service.add_new_course(&mut session, "Compilers", 0)?;

    println!("== enroll_student_in_course");
    report(service.enroll_student_in_course(&mut session, &alice.id, &databases.id));
    report(service.enroll_student_in_course(&mut session, &bob.id, &databases.id));
    report(service.enroll_student_in_course(&mut session, &alice.id, &compilers.id));

    println!("== remove_student_enrollment_from_course");
    report(service.remove_student_enrollment_from_course(&mut session, &bob.id, &databases.id));
    report(session.run(&TransactionDefinition::required(), |s| {
        service.remove_student_enrollment_from_course(s, &bob.id, &databases.id)
    }));

    println!("== get_students_for_course");
    let students = service.get_students_for_course(&mut session, &databases.id)?;
    for student in &students {
        println!("  {} ({})", student.name, student.major);
    }

    println!("== add_new_course inside an open transaction");
    report(session.run(&TransactionDefinition::required(), |s| -> ServiceResult<_> {
        let course = service.add_new_course(s, "Operating Systems", 40)?;
        let mut reader = service.session();
        let visible = service.get_course(&mut reader, &course.id)?.is_some();
        println!("  visible before the outer commit: {}", visible);
        Ok(course)
    }));

    println!("== update_course_and_enrollments");
    match service.update_course_and_enrollments(&mut session, &databases.id, "Advanced Databases") {
        Ok(update) => match update.enrollment_error {
            None => println!(
                "  ok: '{}', {} enrollment(s) updated",
                update.course.title, update.enrollments_updated
            ),
            Some(e) => println!("  ok: '{}', enrollments rolled back: {}", update.course.title, e),
        },
        Err(e) => println!("  failed: {}", e),
    }

    println!("== perform_non_transactional_operation");
    report(service.perform_non_transactional_operation(&mut session));

    for warning in session.warnings() {
        println!("warning: {}", warning);
    }
    drop(session);
    Ok(service)
}

fn report<T: std::fmt::Debug>(result: ServiceResult<T>) {
    match result {
        Ok(_) => println!("  ok"),
        Err(e) => println!("  failed ({}): {}", e.kind(), e),
    }
}

fn print_tables(service: &UniversityService) -> ServiceResult<()> {
    let mut session = service.session();

    println!();
    println!("courses:");
    for course in service.get_all_courses(&mut session)? {
        println!("  {}\t{}\tseats left: {}", course.id, course.title, course.capacity);
    }

    println!("enrollments:");
    for course in service.get_all_courses(&mut session)? {
        for enrollment in service.get_enrollments_by_course(&mut session, &course.id)? {
            let student = service
                .get_student(&mut session, &enrollment.student_id)?
                .map(|s| s.name)
                .unwrap_or_default();
            println!("  {}\t{}\tgrade {}", student, course.title, enrollment.grade);
        }
    }

    println!("audit log:");
    for entry in service.get_logs(&mut session)? {
        println!(
            "  {}\t{}\t{}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            entry.action,
            entry.outcome
        );
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("enrolldb")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_run_options() {
        match parse_args(&args(&["-v", "--pool-size", "3", "--export", "out.json"])) {
            Ok(Command::Run { config, export }) => {
                assert!(config.verbose);
                assert_eq!(config.pool_size, 3);
                assert_eq!(export, Some(PathBuf::from("out.json")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_values_are_rejected() {
        assert_eq!(
            parse_args(&args(&["--export"])).unwrap_err(),
            "--export needs a path"
        );
        assert_eq!(
            parse_args(&args(&["--pool-size"])).unwrap_err(),
            "--pool-size needs a number"
        );
        assert!(parse_args(&args(&["--pool-size", "many"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).is_err());
    }

    #[test]
    fn test_help_and_version() {
        assert!(matches!(parse_args(&args(&["--help"])), Ok(Command::Help)));
        assert!(matches!(parse_args(&args(&["--version"])), Ok(Command::Version)));
    }
}
