pub const HELP: &str = r#"
Available debugger commands:

attach <port>                               -- attach to a target waiting on <port> (see PLDBGBREAK notice)
listen                                      -- open a session waiting for targets hitting global breakpoints
gbreak <routine>[:<line>] [pid <pid>]       -- set a global breakpoint served by the current listening session
wait                                        -- wait until a target hits a global breakpoint of the current session
s, step                                     -- step into the next statement, entering called routines
n, next                                     -- step over the next statement in the selected frame
c, continue                                 -- continue until the next breakpoint
abort                                       -- cancel the statement running in the target
vars                                        -- show variables of the selected frame
bt, stack                                   -- show the call stack of the target
breaks                                      -- show breakpoints of the target
f, frame <level>                            -- select a frame for variable inspection and assignment
source [<routine>]                          -- print source of <routine> or of the current stop routine
b, break <routine>:<line>                   -- set a breakpoint in the target (line -1 means any line)
clear <routine>:<line>                      -- remove a breakpoint from the target
set <name>[.<line>] = <expression>          -- assign a value to a variable of the selected frame
sessions                                    -- list sessions of this proxy
use <handle>                                -- make <handle> the current session
info                                        -- show server version, proxy api version and proxy pid
target-info <routine>                       -- describe a routine by name or identifier
close [<handle>]                            -- close the current (or given) session
h, help                                     -- show help
q, quit                                     -- exit the debugger console

Routines are given by numeric identifier or by (schema qualified) name.
"#;
