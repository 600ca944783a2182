use crate::runtime::CommandLine;
use std::ffi::{OsStr, OsString};

const HELP_FLAGS: [&str; 3] = ["--help", "/?", "-?"];


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Help,
    Run(CommandLine),
}



/*
    @@@
    @parse_args();
    . Takes the arguments after the supervisor's own name.
    . No arguments, or a help flag (any case) in first position, asks for usage.
    . Otherwise the first argument is the program and the rest are handed to it untouched,
      including arguments that look like the supervisor's own flags.
*/
pub fn parse_args<I>(args: I) -> Invocation
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    let Some(program) = args.next() else {
        return Invocation::Help;
    };
    if is_help(&program) {
        return Invocation::Help;
    }
    Invocation::Run(CommandLine {
        program,
        args: args.collect(),
    })
}

fn is_help(arg: &OsStr) -> bool {
    arg.to_str()
        .is_some_and(|arg| HELP_FLAGS.iter().any(|flag| arg.eq_ignore_ascii_case(flag)))
}
